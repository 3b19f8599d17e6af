use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bulksend_core::errors::SendError;
use bulksend_core::traits::Sender;
use tracing::info;

/// 演练模式的发送通道：记录日志，不实际发送
///
/// 命令行在没有真实短信通道时使用它来验证收件人列表、模板和去重配置。
#[derive(Debug, Default)]
pub struct LoggingSender {
    sent: AtomicU64,
}

impl LoggingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已"发送"的消息数
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sender for LoggingSender {
    async fn send(&self, phone: &str, body: &str) -> Result<bool, SendError> {
        if phone.trim().is_empty() {
            return Err(SendError::invalid_recipient("号码为空"));
        }

        let seq = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        info!(seq, phone, chars = body.chars().count(), "[dry-run] {}", body);
        // 演练通道不报告送达结果
        Ok(false)
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulksend_core::errors::SendErrorKind;

    #[tokio::test]
    async fn test_logging_sender_counts_sends() {
        let sender = LoggingSender::new();

        assert!(sender.can_send_now().await);
        assert!(!sender.send("0700000001", "hello").await.unwrap());
        assert!(!sender.send("0700000002", "hello").await.unwrap());
        assert_eq!(sender.sent_count(), 2);
        assert_eq!(sender.name(), "dry-run");
    }

    #[tokio::test]
    async fn test_logging_sender_rejects_blank_phone() {
        let sender = LoggingSender::new();

        let err = sender.send("  ", "hello").await.unwrap_err();
        assert_eq!(err.kind, SendErrorKind::InvalidRecipient);
        assert!(!err.retriable);
        assert_eq!(sender.sent_count(), 0);
    }
}
