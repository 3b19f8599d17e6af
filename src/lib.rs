//! 批量短信发送管道的应用层：组件装配、命令执行和优雅关闭

pub mod app;
pub mod shutdown;

pub use app::{load_recipients, Application};
pub use shutdown::ShutdownManager;
