pub mod app_config;
pub mod database;
pub mod dispatch;
pub mod duplicate;
pub mod observability;
pub mod reconciliation;
pub mod retry;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatch::DispatchConfig;
pub use duplicate::DuplicateConfig;
pub use observability::ObservabilityConfig;
pub use reconciliation::ReconciliationConfig;
pub use retry::RetryConfig;
