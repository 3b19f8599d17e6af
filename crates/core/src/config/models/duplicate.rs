use serde::{Deserialize, Serialize};

/// 重复消息检测的阈值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    /// 相同内容判定为完全重复的时间窗口（毫秒）
    pub exact_duplicate_threshold_ms: u64,
    /// 突发/相似检测的时间窗口（毫秒）
    pub similar_message_threshold_ms: u64,
    /// 内容哈希保留时长（毫秒）
    pub content_hash_window_ms: u64,
    /// 字符集重叠度阈值
    pub similarity_threshold: f64,
    /// 哈希表最大条目数
    pub max_hash_history_entries: usize,
    /// 每个号码保留的最大时间戳数
    pub max_timestamps_per_phone: usize,
    /// 判定为突发所需的窗口内历史消息数
    pub burst_min_prior_messages: usize,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            exact_duplicate_threshold_ms: 60_000,
            similar_message_threshold_ms: 5 * 60_000,
            content_hash_window_ms: 60 * 60_000,
            similarity_threshold: 0.85,
            max_hash_history_entries: 1000,
            max_timestamps_per_phone: 100,
            burst_min_prior_messages: 2,
        }
    }
}

impl DuplicateConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(anyhow::anyhow!(
                "相似度阈值必须在0.0到1.0之间: {}",
                self.similarity_threshold
            ));
        }

        if self.exact_duplicate_threshold_ms > self.similar_message_threshold_ms {
            return Err(anyhow::anyhow!("完全重复窗口不能大于相似消息窗口"));
        }

        if self.similar_message_threshold_ms > self.content_hash_window_ms {
            return Err(anyhow::anyhow!("相似消息窗口不能大于哈希保留时长"));
        }

        if self.max_hash_history_entries == 0 || self.max_timestamps_per_phone == 0 {
            return Err(anyhow::anyhow!("历史容量必须大于0"));
        }

        if self.burst_min_prior_messages == 0 {
            return Err(anyhow::anyhow!("突发判定数量必须大于0"));
        }

        Ok(())
    }
}
