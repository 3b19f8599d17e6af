//! 发送管道的基础设施实现
//!
//! - [`DatabaseManager`] / [`SqliteSendLogStore`] - 基于SQLite的发送记录存储
//! - [`LoggingSender`] - 只记录日志、不实际发送的演练通道

pub mod database;
pub mod logging_sender;

pub use database::*;
pub use logging_sender::LoggingSender;
