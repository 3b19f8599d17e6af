//! 配置管理
//!
//! 配置按组件划分为多个小节，统一由 [`AppConfig`] 聚合。加载顺序为：
//! 内置默认值 → TOML 配置文件 → `BULKSEND__` 前缀的环境变量。
//! 每个小节都提供 `validate()`，加载完成后统一校验。

pub mod models;

pub use models::{
    AppConfig, DatabaseConfig, DispatchConfig, DuplicateConfig, ObservabilityConfig,
    ReconciliationConfig, RetryConfig,
};
