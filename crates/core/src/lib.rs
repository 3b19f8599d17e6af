//! 批量短信发送管道的核心类型
//!
//! 包含数据模型、错误定义、配置以及发送通道和发送日志存储的抽象。
//! 熔断器也放在这里，因为发送控制器和对账任务都依赖它的状态。

pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use circuit_breaker::*;
pub use config::*;
pub use errors::*;
pub use models::*;
pub use traits::*;
