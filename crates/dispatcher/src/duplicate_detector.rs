//! 重复消息检测
//!
//! 基于内容哈希和启发式相似度判断一条消息是否是重复或重传。检测顺序固定为
//! 完全重复 → 突发 → 相似，前两种命中时调用方应跳过该消息。
//!
//! 历史表只保存在内存中，由检测器自身的互斥锁保护，发送路径和接收路径
//! 共享同一个实例。

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{LazyLock, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use bulksend_core::config::DuplicateConfig;

static CURRENCY_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:ksh|kes|tzs|ugx|usd|[$€£])\.?\s?(\d{1,3}(?:,\d{3})+|\d+)(?:\.(\d{1,2}))?")
        .expect("invalid currency amount pattern")
});
static GROUPED_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,3}(?:,\d{3})+|\d+)\.(\d{2})\b|\b(\d{1,3}(?:,\d{3})+)\b")
        .expect("invalid grouped amount pattern")
});
static REFERENCE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z0-9]{8,12}\b").expect("invalid reference pattern"));
static PHONE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{7,12}\b").expect("invalid phone pattern"));

/// 重复类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DuplicateKind {
    /// 同一号码在短时间内的相同内容
    Exact,
    /// 内容高度相似或金额/参考号一致，仅记录不拦截
    Similar,
    /// 同一号码短时间内连续多条，疑似运营商重传
    Burst,
    None,
}

impl fmt::Display for DuplicateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DuplicateKind::Exact => "EXACT",
            DuplicateKind::Similar => "SIMILAR",
            DuplicateKind::Burst => "BURST",
            DuplicateKind::None => "NONE",
        };
        f.write_str(name)
    }
}

/// 一次检测的结果
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub kind: DuplicateKind,
    pub previous_message: Option<String>,
    pub time_since_last: Option<Duration>,
}

impl DuplicateCheck {
    pub fn none() -> Self {
        Self {
            is_duplicate: false,
            kind: DuplicateKind::None,
            previous_message: None,
            time_since_last: None,
        }
    }

    fn found(kind: DuplicateKind, previous_message: Option<String>, delta: Option<Duration>) -> Self {
        Self {
            is_duplicate: true,
            kind,
            previous_message,
            time_since_last: delta,
        }
    }

    /// Exact and burst hits are suppressed; similar hits are only reported.
    pub fn should_suppress(&self) -> bool {
        matches!(self.kind, DuplicateKind::Exact | DuplicateKind::Burst)
    }
}

/// 从消息中提取的指纹
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSignature {
    /// 金额，以最小货币单位保存（1,500.50 → 150050）
    pub amounts: Vec<u64>,
    /// 8-12位同时包含字母和数字的参考号，统一为大写
    pub references: Vec<String>,
    /// 7-12位的号码类数字串
    pub phones: Vec<String>,
}

impl MessageSignature {
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty() && self.references.is_empty() && self.phones.is_empty()
    }

    /// Shares at least one amount or reference code with `other`.
    pub fn overlaps(&self, other: &MessageSignature) -> bool {
        self.amounts.iter().any(|a| other.amounts.contains(a))
            || self.references.iter().any(|r| other.references.contains(r))
    }
}

#[derive(Debug, Clone)]
pub struct MessageHashEntry {
    pub hash: String,
    pub phone: String,
    pub timestamp: DateTime<Utc>,
    pub original_message: String,
    pub signature: MessageSignature,
}

#[derive(Debug, Default)]
struct DetectorState {
    hashes: HashMap<String, MessageHashEntry>,
    phone_timestamps: HashMap<String, VecDeque<DateTime<Utc>>>,
}

pub struct DuplicateDetector {
    config: DuplicateConfig,
    state: Mutex<DetectorState>,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(DuplicateConfig::default())
    }
}

impl DuplicateDetector {
    pub fn new(config: DuplicateConfig) -> Self {
        Self {
            config,
            state: Mutex::new(DetectorState::default()),
        }
    }

    pub fn config(&self) -> &DuplicateConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, DetectorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Classify `message` from `phone` at `timestamp` against the history.
    ///
    /// Never fails; empty input is reported as not a duplicate.
    pub fn check_duplicate(&self, message: &str, phone: &str, timestamp: DateTime<Utc>) -> DuplicateCheck {
        let phone = phone.trim();
        let normalized = normalize(message);
        if normalized.is_empty() || phone.is_empty() {
            return DuplicateCheck::none();
        }

        let state = self.lock();
        self.classify(&state, message, &normalized, phone, timestamp)
    }

    /// Classify and, unless the message is suppressed, register it under a
    /// single lock so concurrent copies of the same message cannot both pass.
    pub fn check_and_register(&self, message: &str, phone: &str, timestamp: DateTime<Utc>) -> DuplicateCheck {
        let phone = phone.trim();
        let normalized = normalize(message);
        if normalized.is_empty() || phone.is_empty() {
            return DuplicateCheck::none();
        }

        let mut state = self.lock();
        let check = self.classify(&state, message, &normalized, phone, timestamp);
        if !check.should_suppress() {
            self.insert(&mut state, message, &normalized, phone, timestamp);
        }
        check
    }

    fn classify(
        &self,
        state: &DetectorState,
        message: &str,
        normalized: &str,
        phone: &str,
        timestamp: DateTime<Utc>,
    ) -> DuplicateCheck {
        let exact_window = Duration::milliseconds(self.config.exact_duplicate_threshold_ms as i64);
        let similar_window = Duration::milliseconds(self.config.similar_message_threshold_ms as i64);
        let hash = content_hash(phone, normalized);

        // 1. 完全重复
        if let Some(entry) = state.hashes.get(&hash) {
            let delta = abs_delta(timestamp, entry.timestamp);
            if delta <= exact_window {
                return DuplicateCheck::found(
                    DuplicateKind::Exact,
                    Some(entry.original_message.clone()),
                    Some(delta),
                );
            }
        }

        // 2. 突发
        if let Some(timestamps) = state.phone_timestamps.get(phone) {
            let recent: Vec<Duration> = timestamps
                .iter()
                .map(|t| abs_delta(timestamp, *t))
                .filter(|d| *d <= similar_window)
                .collect();
            if recent.len() >= self.config.burst_min_prior_messages {
                let previous = latest_for_phone(state, phone).map(|e| e.original_message.clone());
                return DuplicateCheck::found(DuplicateKind::Burst, previous, recent.into_iter().min());
            }
        }

        // 3. 相似
        let candidate_chars = char_set(normalized);
        let candidate_signature = extract_signature(message);
        let similar = state
            .hashes
            .values()
            .filter(|entry| entry.phone == phone)
            .map(|entry| (entry, abs_delta(timestamp, entry.timestamp)))
            .filter(|(_, delta)| *delta <= similar_window)
            .filter(|(entry, _)| {
                let score = similarity(&candidate_chars, &char_set(&normalize(&entry.original_message)));
                score >= self.config.similarity_threshold
                    || candidate_signature.overlaps(&entry.signature)
            })
            .min_by_key(|(_, delta)| *delta);

        if let Some((entry, delta)) = similar {
            return DuplicateCheck::found(
                DuplicateKind::Similar,
                Some(entry.original_message.clone()),
                Some(delta),
            );
        }

        DuplicateCheck::none()
    }

    /// Record an accepted message. Registering the same message at the same
    /// instant twice leaves the history unchanged.
    pub fn register(&self, message: &str, phone: &str, timestamp: DateTime<Utc>) {
        let phone = phone.trim();
        let normalized = normalize(message);
        if normalized.is_empty() || phone.is_empty() {
            return;
        }

        let mut state = self.lock();
        self.insert(&mut state, message, &normalized, phone, timestamp);
    }

    fn insert(
        &self,
        state: &mut DetectorState,
        message: &str,
        normalized: &str,
        phone: &str,
        timestamp: DateTime<Utc>,
    ) {
        let hash = content_hash(phone, normalized);

        self.prune(state, timestamp);

        match state.hashes.get_mut(&hash) {
            Some(entry) if entry.timestamp == timestamp => return,
            // 保留最早的原文，时间戳跟随最近一次登记
            Some(entry) => entry.timestamp = entry.timestamp.max(timestamp),
            None => {
                state.hashes.insert(
                    hash.clone(),
                    MessageHashEntry {
                        hash,
                        phone: phone.to_string(),
                        timestamp,
                        original_message: message.to_string(),
                        signature: extract_signature(message),
                    },
                );
            }
        }

        let timestamps = state.phone_timestamps.entry(phone.to_string()).or_default();
        timestamps.push_back(timestamp);
        while timestamps.len() > self.config.max_timestamps_per_phone {
            timestamps.pop_front();
        }

        self.enforce_capacity(state);
    }

    fn prune(&self, state: &mut DetectorState, now: DateTime<Utc>) {
        let cutoff = now - Duration::milliseconds(self.config.content_hash_window_ms as i64);

        let before = state.hashes.len();
        state.hashes.retain(|_, entry| entry.timestamp >= cutoff);

        state.phone_timestamps.retain(|_, timestamps| {
            timestamps.retain(|t| *t >= cutoff);
            !timestamps.is_empty()
        });

        let pruned = before - state.hashes.len();
        if pruned > 0 {
            debug!("清理过期消息哈希 {} 条", pruned);
        }
    }

    fn enforce_capacity(&self, state: &mut DetectorState) {
        let max = self.config.max_hash_history_entries;
        if state.hashes.len() <= max {
            return;
        }

        let mut by_age: Vec<(DateTime<Utc>, String)> = state
            .hashes
            .values()
            .map(|entry| (entry.timestamp, entry.hash.clone()))
            .collect();
        by_age.sort();

        let excess = state.hashes.len() - max;
        for (_, hash) in by_age.into_iter().take(excess) {
            state.hashes.remove(&hash);
        }
        debug!("消息哈希表超过上限，淘汰最旧的 {} 条", excess);
    }

    pub fn len(&self) -> usize {
        self.lock().hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of recent timestamps tracked for `phone`.
    pub fn recent_count(&self, phone: &str) -> usize {
        self.lock()
            .phone_timestamps
            .get(phone.trim())
            .map_or(0, VecDeque::len)
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.hashes.clear();
        state.phone_timestamps.clear();
    }
}

fn latest_for_phone<'a>(state: &'a DetectorState, phone: &str) -> Option<&'a MessageHashEntry> {
    state
        .hashes
        .values()
        .filter(|entry| entry.phone == phone)
        .max_by_key(|entry| entry.timestamp)
}

fn abs_delta(a: DateTime<Utc>, b: DateTime<Utc>) -> Duration {
    (a - b).abs()
}

/// Lowercase, collapse whitespace, trim.
pub fn normalize(message: &str) -> String {
    message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn content_hash(phone: &str, normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(phone.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

fn char_set(normalized: &str) -> HashSet<char> {
    normalized.chars().filter(|c| !c.is_whitespace()).collect()
}

/// `|a ∩ b| / max(|a|, |b|)`, 0 when both are empty.
fn similarity(a: &HashSet<char>, b: &HashSet<char>) -> f64 {
    let larger = a.len().max(b.len());
    if larger == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / larger as f64
}

fn to_minor_units(whole: &str, fraction: Option<&str>) -> Option<u64> {
    let whole: u64 = whole.replace(',', "").parse().ok()?;
    let cents = match fraction {
        Some(f) if f.len() == 1 => f.parse::<u64>().ok()? * 10,
        Some(f) => f.parse::<u64>().ok()?,
        None => 0,
    };
    whole.checked_mul(100)?.checked_add(cents)
}

/// Extract amounts, reference codes and phone-like tokens from `message`.
pub fn extract_signature(message: &str) -> MessageSignature {
    let mut amounts = BTreeSet::new();
    for caps in CURRENCY_AMOUNT.captures_iter(message) {
        let fraction = caps.get(2).map(|m| m.as_str());
        if let Some(value) = caps.get(1).and_then(|m| to_minor_units(m.as_str(), fraction)) {
            amounts.insert(value);
        }
    }
    for caps in GROUPED_AMOUNT.captures_iter(message) {
        // 跳过嵌在更长数字或单词中的片段（例如 1,500.50 中的 500.50）
        let start = caps.get(0).map_or(0, |m| m.start());
        if message[..start]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric() || c == ',' || c == '.')
        {
            continue;
        }
        let value = match (caps.get(1), caps.get(2), caps.get(3)) {
            (Some(whole), Some(fraction), _) => to_minor_units(whole.as_str(), Some(fraction.as_str())),
            (_, _, Some(whole)) => to_minor_units(whole.as_str(), None),
            _ => None,
        };
        if let Some(value) = value {
            amounts.insert(value);
        }
    }

    let references: BTreeSet<String> = REFERENCE_CODE
        .find_iter(message)
        .map(|m| m.as_str())
        .filter(|token| {
            token.chars().any(|c| c.is_ascii_alphabetic()) && token.chars().any(|c| c.is_ascii_digit())
        })
        .map(str::to_uppercase)
        .collect();

    let phones: BTreeSet<String> = PHONE_TOKEN
        .find_iter(message)
        .map(|m| m.as_str().to_string())
        .collect();

    MessageSignature {
        amounts: amounts.into_iter().collect(),
        references: references.into_iter().collect(),
        phones: phones.into_iter().collect(),
    }
}
