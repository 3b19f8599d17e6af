use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::traits::{Clock, SystemClock};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed - normal operation
    Closed,
    /// Circuit is open - sends are rejected until the cooldown elapses
    Open,
    /// Cooldown elapsed - the next attempt is a probe
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Cooldown after the circuit first opens
    pub cooldown_ms: u64,
    /// Multiplier applied to the cooldown when a half-open probe fails
    pub backoff_multiplier: f64,
    /// Maximum cooldown
    pub max_cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 60_000,
            backoff_multiplier: 2.0,
            max_cooldown_ms: 300_000, // 5 minutes
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.failure_threshold == 0 {
            return Err(anyhow::anyhow!("熔断阈值必须大于0"));
        }
        if self.cooldown_ms == 0 {
            return Err(anyhow::anyhow!("熔断冷却时间必须大于0"));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("熔断冷却退避倍数不能小于1"));
        }
        if self.max_cooldown_ms < self.cooldown_ms {
            return Err(anyhow::anyhow!("最大冷却时间不能小于初始冷却时间"));
        }
        Ok(())
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Number of consecutive failures
    pub consecutive_failures: u32,
    /// Total outcomes recorded
    pub total_calls: u64,
    /// Total successful calls
    pub successful_calls: u64,
    /// Total failed calls
    pub failed_calls: u64,
    /// Sends refused while open
    pub rejected_calls: u64,
    /// End of the current cooldown, set while open
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Cooldown that applies the next time the circuit opens from half-open
    pub current_cooldown_ms: u64,
}

impl CircuitBreakerStats {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
            cooldown_until: None,
            current_cooldown_ms: config.cooldown_ms,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    /// Calculate failure rate
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.failed_calls as f64 / self.total_calls as f64
        }
    }
}

/// Circuit breaker guarding the send channel.
///
/// The dispatch worker is the only writer; observers read through
/// [`CircuitBreaker::stats`] and [`CircuitBreaker::cooldown_remaining_ms`].
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    stats: RwLock<CircuitBreakerStats>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    /// Create new circuit breaker with default configuration
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create new circuit breaker with custom configuration
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let stats = CircuitBreakerStats::new(&config);
        Self {
            config,
            clock,
            stats: RwLock::new(stats),
        }
    }

    /// Whether a send may be attempted now.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open and lets
    /// the attempt through as a probe.
    pub async fn can_send(&self) -> bool {
        let mut stats = self.stats.write().await;

        match stats.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let now = self.clock.now();
                let elapsed = stats.cooldown_until.map_or(true, |until| now >= until);
                if elapsed {
                    stats.state = CircuitState::HalfOpen;
                    stats.cooldown_until = None;
                    true
                } else {
                    stats.rejected_calls += 1;
                    false
                }
            }
        }
    }

    /// Record successful call
    pub async fn record_success(&self) {
        let mut stats = self.stats.write().await;

        stats.total_calls += 1;
        stats.successful_calls += 1;
        stats.consecutive_failures = 0;

        if stats.state != CircuitState::Closed {
            stats.state = CircuitState::Closed;
            stats.cooldown_until = None;
            stats.current_cooldown_ms = self.config.cooldown_ms; // Reset cooldown
        }
    }

    /// Record failed call
    pub async fn record_failure(&self) {
        let mut stats = self.stats.write().await;

        stats.total_calls += 1;
        stats.failed_calls += 1;
        stats.consecutive_failures = stats.consecutive_failures.saturating_add(1);

        match stats.state {
            CircuitState::Closed if stats.consecutive_failures >= self.config.failure_threshold => {
                stats.current_cooldown_ms = self.config.cooldown_ms;
                self.open(&mut stats);
            }
            CircuitState::HalfOpen => {
                // Failed probe: reopen with a longer cooldown
                let next = (stats.current_cooldown_ms as f64 * self.config.backoff_multiplier) as u64;
                stats.current_cooldown_ms = next.min(self.config.max_cooldown_ms);
                self.open(&mut stats);
            }
            _ => {}
        }
    }

    fn open(&self, stats: &mut CircuitBreakerStats) {
        stats.state = CircuitState::Open;
        stats.cooldown_until =
            Some(self.clock.now() + Duration::milliseconds(stats.current_cooldown_ms as i64));
    }

    /// Milliseconds until an open circuit admits a probe; 0 when not open.
    pub async fn cooldown_remaining_ms(&self) -> u64 {
        let stats = self.stats.read().await;
        match (stats.state, stats.cooldown_until) {
            (CircuitState::Open, Some(until)) => {
                (until - self.clock.now()).num_milliseconds().max(0) as u64
            }
            _ => 0,
        }
    }

    /// Get current circuit state
    pub async fn get_state(&self) -> CircuitState {
        self.stats.read().await.state
    }

    /// Get circuit breaker statistics
    pub async fn stats(&self) -> CircuitBreakerStats {
        self.stats.read().await.clone()
    }

    /// Reset circuit breaker to closed state
    pub async fn reset(&self) {
        let mut stats = self.stats.write().await;
        *stats = CircuitBreakerStats::new(&self.config);
    }

    /// Force open circuit, e.g. when the sender reports it lost the SMS role
    pub async fn force_open(&self) {
        let mut stats = self.stats.write().await;
        self.open(&mut stats);
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}
