//! Test data builders for creating test entities
//!
//! This module provides builder patterns for creating test data with
//! sensible defaults and easy customization.

use chrono::{DateTime, Duration, Utc};

use bulksend_core::models::{body_digest, Recipient, SendLogRecord, SendStatus, TemplateValue};

/// Builder for creating test Recipient entities
pub struct RecipientBuilder {
    recipient: Recipient,
}

impl RecipientBuilder {
    pub fn new() -> Self {
        Self {
            recipient: Recipient::new("0700000001"),
        }
    }

    pub fn with_phone(mut self, phone: &str) -> Self {
        self.recipient.phone = phone.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.recipient.name = Some(name.to_string());
        self
    }

    pub fn with_field(mut self, key: &str, value: impl Into<TemplateValue>) -> Self {
        self.recipient
            .template_fields
            .insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> Recipient {
        self.recipient
    }

    /// `count` recipients with distinct phones `0700000001..`
    pub fn many(count: usize) -> Vec<Recipient> {
        (1..=count)
            .map(|i| {
                RecipientBuilder::new()
                    .with_phone(&format!("07{:08}", i))
                    .with_name(&format!("Recipient {}", i))
                    .build()
            })
            .collect()
    }
}

impl Default for RecipientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test SendLogRecord entities
pub struct SendLogRecordBuilder {
    record: SendLogRecord,
}

impl SendLogRecordBuilder {
    pub fn new() -> Self {
        Self {
            record: SendLogRecord {
                id: 1,
                phone: "0700000001".to_string(),
                body_hash: body_digest("test message"),
                status: SendStatus::Pending,
                timestamp: Utc::now(),
                retry_count: 0,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.record.id = id;
        self
    }

    pub fn with_phone(mut self, phone: &str) -> Self {
        self.record.phone = phone.to_string();
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.record.body_hash = body_digest(body);
        self
    }

    pub fn with_status(mut self, status: SendStatus) -> Self {
        self.record.status = status;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.record.timestamp = timestamp;
        self
    }

    /// Timestamp `age` before `now`
    pub fn aged(mut self, now: DateTime<Utc>, age: Duration) -> Self {
        self.record.timestamp = now - age;
        self
    }

    pub fn with_retry_count(mut self, retry_count: i32) -> Self {
        self.record.retry_count = retry_count;
        self
    }

    pub fn sent(mut self) -> Self {
        self.record.status = SendStatus::Sent;
        self
    }

    pub fn failed(mut self) -> Self {
        self.record.status = SendStatus::Failed;
        self
    }

    pub fn delivered(mut self) -> Self {
        self.record.status = SendStatus::Delivered;
        self
    }

    pub fn build(self) -> SendLogRecord {
        self.record
    }
}

impl Default for SendLogRecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}
