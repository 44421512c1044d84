use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Circuit breaker configuration for repeated settlement rejections
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Max consecutive rejections before the breaker opens (0 disables it)
    pub max_consecutive_failures: u32,
    /// How long an open breaker suppresses scheduled settlement attempts
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-entity consecutive-failure counter with a cooldown breaker.
///
/// Only validation rejections count. Transient transport failures and
/// window/staleness resets leave the counter alone.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    half_open: bool,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
            open_until: None,
            half_open: false,
        }
    }

    fn enabled(&self) -> bool {
        self.config.max_consecutive_failures > 0
    }

    /// Whether a scheduled settlement attempt may run now
    pub fn allows_attempt(&mut self, label: &str) -> bool {
        match self.open_until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                info!("🔌 Circuit breaker for {} half-open, allowing one attempt", label);
                self.open_until = None;
                self.half_open = true;
                true
            }
            None => true,
        }
    }

    pub fn record_success(&mut self, label: &str) {
        if self.half_open || self.consecutive_failures > 0 {
            info!(
                "✓ {} settled after {} consecutive rejection(s), breaker closed",
                label, self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.open_until = None;
        self.half_open = false;
    }

    /// Count a rejection. Returns `true` when this rejection opened the breaker.
    pub fn record_rejection(&mut self, label: &str) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if !self.enabled() {
            return false;
        }

        if self.half_open || self.consecutive_failures >= self.config.max_consecutive_failures {
            self.half_open = false;
            self.open_until = Some(Instant::now() + self.config.cooldown);
            error!(
                "Circuit breaker triggered for {}: {} consecutive rejections, pausing settlement for {:?}",
                label, self.consecutive_failures, self.config.cooldown
            );
            return true;
        }

        warn!(
            "⚠️ {} settlement rejected ({}/{})",
            label, self.consecutive_failures, self.config.max_consecutive_failures
        );
        false
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn state(&self) -> BreakerState {
        if self.open_until.is_some() {
            BreakerState::Open
        } else if self.half_open {
            BreakerState::HalfOpen
        } else {
            BreakerState::Closed
        }
    }
}
