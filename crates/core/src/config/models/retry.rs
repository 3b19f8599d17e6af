use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 重试策略配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 基础重试间隔（毫秒）
    pub base_delay_ms: u64,
    /// 最大重试间隔（毫秒）
    pub max_delay_ms: u64,
    /// 最大尝试次数（包含第一次）
    pub max_attempts: u32,
    /// 发送类操作的单次超时（毫秒）
    pub send_timeout_ms: u64,
    /// 启动类操作的单次超时（毫秒）
    pub startup_timeout_ms: u64,
    /// 重试间隔的随机抖动范围（0.0-1.0），只作用于实际等待时间
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
            send_timeout_ms: 10_000,
            startup_timeout_ms: 60_000,
            jitter_factor: 0.0,
        }
    }
}

impl RetryConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_delay_ms == 0 {
            return Err(anyhow::anyhow!("基础重试间隔必须大于0"));
        }

        if self.max_delay_ms < self.base_delay_ms {
            return Err(anyhow::anyhow!("最大重试间隔不能小于基础重试间隔"));
        }

        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("最大尝试次数必须大于0"));
        }

        if self.send_timeout_ms == 0 || self.startup_timeout_ms == 0 {
            return Err(anyhow::anyhow!("单次超时时间必须大于0"));
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!(
                "抖动系数必须在0.0到1.0之间: {}",
                self.jitter_factor
            ));
        }

        Ok(())
    }
}
