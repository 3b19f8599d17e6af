use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 对账服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// 是否启用定时对账
    pub enabled: bool,
    /// 对账间隔（秒）
    pub interval_seconds: u64,
    /// 记录超过该时长仍未决则标记为 UNKNOWN（毫秒）
    pub stale_threshold_ms: u64,
    /// 每次查询的最大记录数
    pub batch_limit: i64,
    /// 发送任务运行时推迟对账
    pub defer_while_dispatching: bool,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 3600,             // 1小时
            stale_threshold_ms: 2 * 3_600_000, // 2小时
            batch_limit: 500,
            defer_while_dispatching: true,
        }
    }
}

impl ReconciliationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_threshold_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_seconds == 0 {
            return Err(anyhow::anyhow!("对账间隔必须大于0"));
        }

        if self.stale_threshold_ms == 0 {
            return Err(anyhow::anyhow!("过期阈值必须大于0"));
        }

        if self.batch_limit <= 0 {
            return Err(anyhow::anyhow!("对账批次大小必须大于0"));
        }

        Ok(())
    }
}
