use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::models::SendStatus;

/// 发送失败的分类，在错误产生处确定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendErrorKind {
    /// 网络异常
    Network,
    /// 单次尝试超时
    Timeout,
    /// 发送通道暂时不可用（例如无信号、SIM卡繁忙）
    TransportUnavailable,
    /// 无效的接收号码
    InvalidRecipient,
    /// 权限被拒绝（无短信权限、默认短信应用角色丢失）
    PermissionDenied,
    /// 运营商或平台明确拒绝
    Rejected,
}

impl SendErrorKind {
    /// Default retry classification for the kind. Callers may override it
    /// with [`SendError::with_retriable`] when the origin knows better.
    pub fn default_retriable(self) -> bool {
        matches!(
            self,
            SendErrorKind::Network | SendErrorKind::Timeout | SendErrorKind::TransportUnavailable
        )
    }
}

impl fmt::Display for SendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SendErrorKind::Network => "网络错误",
            SendErrorKind::Timeout => "发送超时",
            SendErrorKind::TransportUnavailable => "发送通道不可用",
            SendErrorKind::InvalidRecipient => "无效的接收号码",
            SendErrorKind::PermissionDenied => "权限被拒绝",
            SendErrorKind::Rejected => "发送被拒绝",
        };
        f.write_str(name)
    }
}

/// 单条消息发送失败
///
/// `retriable` 在构造时确定，下游只读取该字段，不再根据错误码推断。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct SendError {
    pub kind: SendErrorKind,
    pub message: String,
    pub retriable: bool,
}

impl SendError {
    pub fn new(kind: SendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retriable: kind.default_retriable(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(SendErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SendErrorKind::Timeout, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(SendErrorKind::TransportUnavailable, message)
    }

    pub fn invalid_recipient(message: impl Into<String>) -> Self {
        Self::new(SendErrorKind::InvalidRecipient, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(SendErrorKind::PermissionDenied, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(SendErrorKind::Rejected, message)
    }

    pub fn with_retriable(mut self, retriable: bool) -> Self {
        self.retriable = retriable;
        self
    }
}

/// Retry classification shared by every error type the retry executor handles.
pub trait Retriable {
    fn is_retriable(&self) -> bool;

    /// Error produced when one attempt exceeds its time budget.
    fn attempt_timed_out(label: &str, timeout: Duration) -> Self
    where
        Self: Sized;
}

impl Retriable for SendError {
    fn is_retriable(&self) -> bool {
        self.retriable
    }

    fn attempt_timed_out(label: &str, timeout: Duration) -> Self {
        SendError::timeout(format!("{label} 超过 {}ms 未完成", timeout.as_millis()))
    }
}

/// 发送管道错误类型定义
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error("发送记录未找到: {id}")]
    SendLogNotFound { id: i64 },

    #[error("发送记录 {id} 状态不允许从 {from} 变更为 {to}")]
    InvalidStatusTransition {
        id: i64,
        from: SendStatus,
        to: SendStatus,
    },

    #[error("当前状态 {phase} 不允许执行 {action}")]
    InvalidTransition { phase: String, action: String },

    #[error("已有发送任务正在运行")]
    AlreadyRunning,

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("发送任务已取消")]
    Cancelled,

    #[error("内部错误: {0}")]
    Internal(String),
}

impl Retriable for DispatchError {
    fn is_retriable(&self) -> bool {
        match self {
            DispatchError::Send(e) => e.retriable,
            DispatchError::Timeout(_) => true,
            DispatchError::Database(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) => true,
            _ => false,
        }
    }

    fn attempt_timed_out(label: &str, timeout: Duration) -> Self {
        DispatchError::Timeout(format!("{label} 超过 {}ms 未完成", timeout.as_millis()))
    }
}

/// 统一的Result类型
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_error_default_classification() {
        assert!(SendError::network("connection reset").retriable);
        assert!(SendError::timeout("no ack").retriable);
        assert!(SendError::unavailable("no signal").retriable);
        assert!(!SendError::invalid_recipient("bad number").retriable);
        assert!(!SendError::permission_denied("SEND_SMS").retriable);
        assert!(!SendError::rejected("carrier block").retriable);
    }

    #[test]
    fn test_send_error_override() {
        let err = SendError::rejected("rate limited").with_retriable(true);
        assert!(err.is_retriable());
        assert_eq!(err.kind, SendErrorKind::Rejected);
    }

    #[test]
    fn test_dispatch_error_retriable_follows_source() {
        let err: DispatchError = SendError::network("reset").into();
        assert!(err.is_retriable());

        let err: DispatchError = SendError::invalid_recipient("empty").into();
        assert!(!err.is_retriable());

        assert!(!DispatchError::Storage("disk full".to_string()).is_retriable());
        assert!(DispatchError::attempt_timed_out("startup", Duration::from_secs(60)).is_retriable());
    }

    #[test]
    fn test_timeout_error_message() {
        let err = SendError::attempt_timed_out("send", Duration::from_millis(10_000));
        assert_eq!(err.kind, SendErrorKind::Timeout);
        assert!(err.to_string().contains("10000ms"));
    }
}
