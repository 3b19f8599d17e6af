//! Mock implementations of the sender and send-log store traits
//!
//! In-memory test doubles that can be used for unit and component tests
//! without a database or a real SMS transport.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bulksend_core::errors::{DispatchError, DispatchResult, SendError};
use bulksend_core::models::{SendLogRecord, SendStatus};
use bulksend_core::traits::{SendLogStore, Sender};

/// Mock implementation of Sender for testing
///
/// By default every send succeeds without delivery confirmation. Outcomes can
/// be scripted per phone; scripted outcomes are consumed in order, and a
/// permanent failure set with [`MockSender::fail_phone`] applies to every call.
#[derive(Debug, Clone)]
pub struct MockSender {
    scripted: Arc<Mutex<HashMap<String, VecDeque<Result<bool, SendError>>>>>,
    failing: Arc<Mutex<HashMap<String, SendError>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
    available: Arc<AtomicBool>,
    confirm_delivery: Arc<AtomicBool>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl MockSender {
    pub fn new() -> Self {
        Self {
            scripted: Arc::new(Mutex::new(HashMap::new())),
            failing: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            available: Arc::new(AtomicBool::new(true)),
            confirm_delivery: Arc::new(AtomicBool::new(false)),
            delay: Arc::new(Mutex::new(None)),
        }
    }

    /// Every send takes `delay` before returning
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    /// Successful sends report delivery confirmation
    pub fn confirming_delivery(self) -> Self {
        self.confirm_delivery.store(true, Ordering::SeqCst);
        self
    }

    /// Every send to `phone` fails with `error`
    pub fn fail_phone(&self, phone: &str, error: SendError) {
        self.failing.lock().unwrap().insert(phone.to_string(), error);
    }

    /// Queue outcomes for `phone`, consumed one per call
    pub fn script(&self, phone: &str, outcomes: Vec<Result<bool, SendError>>) {
        self.scripted
            .lock()
            .unwrap()
            .entry(phone.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Value returned by `can_send_now`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, phone: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == phone)
            .count()
    }

    /// Phones in call order, duplicates included
    pub fn called_phones(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(p, _)| p.clone())
            .collect()
    }
}

impl Default for MockSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sender for MockSender {
    async fn send(&self, phone: &str, body: &str) -> Result<bool, SendError> {
        self.calls
            .lock()
            .unwrap()
            .push((phone.to_string(), body.to_string()));

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(phone)
            .and_then(|outcomes| outcomes.pop_front());
        if let Some(outcome) = scripted {
            return outcome;
        }

        if let Some(error) = self.failing.lock().unwrap().get(phone) {
            return Err(error.clone());
        }

        Ok(self.confirm_delivery.load(Ordering::SeqCst))
    }

    async fn can_send_now(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Mock implementation of SendLogStore for testing
///
/// Enforces the same status transition rules as the SQLite store.
#[derive(Debug, Clone)]
pub struct MockSendLogStore {
    records: Arc<Mutex<BTreeMap<i64, SendLogRecord>>>,
    next_id: Arc<Mutex<i64>>,
    fail_writes: Arc<AtomicBool>,
    failing_updates: Arc<Mutex<HashSet<i64>>>,
}

impl MockSendLogStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            fail_writes: Arc::new(AtomicBool::new(false)),
            failing_updates: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Seed the store; records keep their ids
    pub fn with_records(records: Vec<SendLogRecord>) -> Self {
        let max_id = records.iter().map(|r| r.id).max().unwrap_or(0);
        let map = records.into_iter().map(|r| (r.id, r)).collect();

        Self {
            records: Arc::new(Mutex::new(map)),
            next_id: Arc::new(Mutex::new(max_id + 1)),
            fail_writes: Arc::new(AtomicBool::new(false)),
            failing_updates: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Make every write fail as if the database were unavailable
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Status updates for `id` fail while other records stay writable
    pub fn fail_updates_for(&self, id: i64) {
        self.failing_updates.lock().unwrap().insert(id);
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// All records ordered by id
    pub fn all_records(&self) -> Vec<SendLogRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    /// Statuses ordered by id
    pub fn statuses(&self) -> Vec<SendStatus> {
        self.records
            .lock()
            .unwrap()
            .values()
            .map(|r| r.status)
            .collect()
    }

    fn check_writable(&self) -> DispatchResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DispatchError::Storage("mock store unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for MockSendLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SendLogStore for MockSendLogStore {
    async fn append(&self, record: &SendLogRecord) -> DispatchResult<SendLogRecord> {
        self.check_writable()?;
        let mut records = self.records.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut new_record = record.clone();
        new_record.id = *next_id;
        *next_id += 1;

        records.insert(new_record.id, new_record.clone());
        Ok(new_record)
    }

    async fn query_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> DispatchResult<Vec<SendLogRecord>> {
        let records = self.records.lock().unwrap();
        let mut stale: Vec<SendLogRecord> = records
            .values()
            .filter(|r| r.is_unresolved() && r.timestamp < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|r| (r.timestamp, r.id));
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn update_status(&self, id: i64, status: SendStatus) -> DispatchResult<()> {
        self.check_writable()?;
        if self.failing_updates.lock().unwrap().contains(&id) {
            return Err(DispatchError::Storage(format!("mock update of record {id} failed")));
        }
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or(DispatchError::SendLogNotFound { id })?;

        if !record.status.can_transition_to(status) {
            return Err(DispatchError::InvalidStatusTransition {
                id,
                from: record.status,
                to: status,
            });
        }
        record.status = status;
        Ok(())
    }

    async fn update_retry_count(&self, id: i64, retry_count: i32) -> DispatchResult<()> {
        self.check_writable()?;
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or(DispatchError::SendLogNotFound { id })?;
        record.retry_count = retry_count;
        Ok(())
    }

    async fn get(&self, id: i64) -> DispatchResult<Option<SendLogRecord>> {
        Ok(self.records.lock().unwrap().get(&id).cloned())
    }

    async fn list_by_status(&self, status: SendStatus) -> DispatchResult<Vec<SendLogRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }
}
