use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use bulksend_core::config::RetryConfig;
use bulksend_core::errors::Retriable;

/// Observability hook invoked before each retry sleep:
/// `(failed_attempt, error, delay)`.
pub type OnRetry<'a, E> = &'a (dyn Fn(u32, &E, Duration) + Send + Sync);

/// 重试策略
///
/// 指数退避：`min(base * 2^(attempt-1), max)`。是否重试只取决于尝试次数和
/// 错误自带的 `retriable` 标记。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    /// 发送类操作的重试策略，单次尝试使用发送超时
    pub fn new(config: RetryConfig) -> Self {
        let attempt_timeout = config.send_timeout();
        Self {
            config,
            attempt_timeout,
        }
    }

    /// 启动类操作的重试策略，单次尝试使用启动超时
    pub fn startup(config: RetryConfig) -> Self {
        let attempt_timeout = config.startup_timeout();
        Self {
            config,
            attempt_timeout,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Backoff before retrying after the given (1-based) failed attempt.
    /// Attempt 0 is treated as 1.
    pub fn compute_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = 2u64.checked_pow(exponent).unwrap_or(u64::MAX);
        let delay_ms = self
            .config
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    pub fn should_retry<E: Retriable>(&self, error: &E, attempt: u32) -> bool {
        if attempt >= self.config.max_attempts {
            return false;
        }
        error.is_retriable()
    }

    /// 实际等待时间：退避时间加上可选的随机抖动
    fn sleep_duration(&self, attempt: u32) -> Duration {
        let delay = self.compute_backoff(attempt);
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }
        let jitter = delay.as_secs_f64() * self.config.jitter_factor * rand::random::<f64>();
        delay + Duration::from_secs_f64(jitter)
    }

    /// 执行操作，遇到可重试错误时按退避时间重试
    ///
    /// 重试次数用尽后返回最后一次的原始错误。单次尝试超过
    /// [`attempt_timeout`](Self::attempt_timeout) 视为一次可重试的失败。
    /// 调用方可以直接丢弃返回的 future 来取消整个重试过程。
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        mut operation: F,
        label: &str,
        on_retry: Option<OnRetry<'_, E>>,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retriable + Display,
    {
        let mut attempt: u32 = 1;

        loop {
            let result = match tokio::time::timeout(self.attempt_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(E::attempt_timed_out(label, self.attempt_timeout)),
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} 在第 {} 次尝试时成功", label, attempt);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !self.should_retry(&error, attempt) {
                if error.is_retriable() {
                    warn!("{} 已达到最大尝试次数 {}: {}", label, self.config.max_attempts, error);
                } else {
                    debug!("{} 遇到不可重试的错误: {}", label, error);
                }
                return Err(error);
            }

            let delay = self.sleep_duration(attempt);
            if let Some(hook) = on_retry {
                hook(attempt, &error, delay);
            }
            warn!(
                "{} 第 {} 次尝试失败: {}，{}ms 后重试",
                label,
                attempt,
                error,
                delay.as_millis()
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
