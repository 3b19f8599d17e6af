//! # 数据模型
//!
//! 发送管道的核心数据结构：
//!
//! - [`Recipient`] - 发送目标，调用方提供，管道只读
//! - [`SendTask`] - 单次发送尝试的临时载体
//! - [`SendLogRecord`] - 持久化的发送记录，状态单调流转
//! - [`QueueState`] - 发送控制器对外发布的队列状态快照
//!
//! ## 发送记录状态流转
//!
//! ```text
//! Pending → Sent → Delivered
//!    │        └──→ Unknown
//!    ├──→ Failed
//!    └──→ Unknown   (对账服务处理长时间未决的记录)
//! ```
//!
//! `Failed`、`Delivered`、`Unknown` 为终态。上层的重发会创建新的记录，
//! 而不是修改已有记录的状态。

pub mod queue_state;
pub mod recipient;
pub mod send_log;
pub mod send_task;

pub use queue_state::*;
pub use recipient::*;
pub use send_log::*;
pub use send_task::*;
