use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendLogRecord {
    pub id: i64,
    pub phone: String,
    pub body_hash: String,
    pub status: SendStatus,
    pub timestamp: DateTime<Utc>,
    pub retry_count: i32,
}

impl SendLogRecord {
    /// 新建一条待发送记录，id 由存储层分配
    pub fn pending(phone: impl Into<String>, body_hash: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            phone: phone.into(),
            body_hash: body_hash.into(),
            status: SendStatus::Pending,
            timestamp,
            retry_count: 0,
        }
    }

    /// 状态尚未确定（对账服务关注的记录）
    pub fn is_unresolved(&self) -> bool {
        matches!(self.status, SendStatus::Pending | SendStatus::Sent)
    }

    pub fn entity_description(&self) -> String {
        format!("发送记录 (ID: {}, 号码: {})", self.id, self.phone)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SendStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "SENT")]
    Sent,
    #[serde(rename = "DELIVERED")]
    Delivered,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl SendStatus {
    pub const ALL: [SendStatus; 5] = [
        SendStatus::Pending,
        SendStatus::Sent,
        SendStatus::Delivered,
        SendStatus::Failed,
        SendStatus::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SendStatus::Pending => "PENDING",
            SendStatus::Sent => "SENT",
            SendStatus::Delivered => "DELIVERED",
            SendStatus::Failed => "FAILED",
            SendStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(SendStatus::Pending),
            "SENT" => Some(SendStatus::Sent),
            "DELIVERED" => Some(SendStatus::Delivered),
            "FAILED" => Some(SendStatus::Failed),
            "UNKNOWN" => Some(SendStatus::Unknown),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SendStatus::Delivered | SendStatus::Failed | SendStatus::Unknown
        )
    }

    /// Status graph is monotonic; anything not listed here is rejected by stores.
    pub fn can_transition_to(&self, next: SendStatus) -> bool {
        use SendStatus::*;
        matches!(
            (self, next),
            (Pending, Sent) | (Pending, Failed) | (Pending, Unknown) | (Sent, Delivered) | (Sent, Unknown)
        )
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<sqlx::Sqlite> for SendStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for SendStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        SendStatus::parse(s).ok_or_else(|| format!("Invalid send status: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for SendStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}
