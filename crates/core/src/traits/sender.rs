//! 短信发送通道接口
//!
//! 平台的短信发送能力被抽象为 [`Sender`]。核心管道把它视为不可信的外部协作方：
//! 每次调用都由重试策略的单次超时约束，失败通过 [`SendError`] 携带可重试标记返回。

use async_trait::async_trait;

use crate::errors::SendError;

/// 发送单条消息的能力
#[async_trait]
pub trait Sender: Send + Sync {
    /// 发送一条消息
    ///
    /// # 返回值
    ///
    /// * `Ok(true)` - 通道确认已送达
    /// * `Ok(false)` - 已提交发送，但通道不报告送达结果
    /// * `Err(SendError)` - 发送失败，`retriable` 字段决定是否重试
    async fn send(&self, phone: &str, body: &str) -> Result<bool, SendError>;

    /// 当前是否具备发送条件（默认短信应用角色、SIM卡等）
    ///
    /// 返回 `false` 时控制器不会发起发送，并向熔断器记录一次失败。
    async fn can_send_now(&self) -> bool {
        true
    }

    /// 通道名称，用于日志
    fn name(&self) -> &str {
        "sender"
    }
}
