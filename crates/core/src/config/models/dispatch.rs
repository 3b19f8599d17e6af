use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 批量发送的速率控制
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// 每批处理的接收者数量
    pub batch_size: usize,
    /// 相邻两条消息之间的间隔（毫秒），用于遵守运营商吞吐限制
    pub send_speed_ms: u64,
    /// 计数器刷新到可观察状态的最小间隔（毫秒）
    pub flush_interval_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            send_speed_ms: 400,
            flush_interval_ms: 1000,
        }
    }
}

impl DispatchConfig {
    pub fn send_speed(&self) -> Duration {
        Duration::from_millis(self.send_speed_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            return Err(anyhow::anyhow!("批次大小必须大于0"));
        }

        if self.flush_interval_ms == 0 {
            return Err(anyhow::anyhow!("状态刷新间隔必须大于0"));
        }

        Ok(())
    }
}
