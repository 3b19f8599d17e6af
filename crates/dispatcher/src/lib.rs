//! 批量发送管道
//!
//! - [`duplicate_detector`] - 重复消息检测
//! - [`retry_service`] - 指数退避重试
//! - [`controller`] - 批量发送控制器（状态机、暂停/停止、计数）
//! - [`reconciliation_service`] - 未决发送记录的定时对账
//! - [`incoming`] - 接收消息去重
//! - [`template`] - 消息模板渲染

pub mod controller;
pub mod duplicate_detector;
pub mod incoming;
pub mod reconciliation_service;
pub mod retry_service;
pub mod template;

pub use controller::{ActivityGuard, DispatchActivity, DispatchController, DispatchHandle, DispatchReport};
pub use duplicate_detector::{
    extract_signature, DuplicateCheck, DuplicateDetector, DuplicateKind, MessageHashEntry,
    MessageSignature,
};
pub use incoming::{IncomingDecision, IncomingMessageGate};
pub use reconciliation_service::{
    ReconciliationReport, ReconciliationScheduler, ReconciliationSweeper, SweepOutcome,
};
pub use retry_service::{OnRetry, RetryPolicy};
pub use template::MessageTemplate;
