use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackoffConfig, RetryConfig};

/// Delay before the next attempt, given how many attempts have failed.
pub trait BackoffPolicy: Send + Sync + Debug {
    /// `failed_attempts` is 1 after the first failure.
    fn delay(&self, failed_attempts: u32) -> Duration;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixedBackoff {
    pub delay: Duration,
}

impl BackoffPolicy for FixedBackoff {
    fn delay(&self, _failed_attempts: u32) -> Duration {
        self.delay
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max.as_secs_f64()))
    }

    fn name(&self) -> &'static str {
        "exponential"
    }
}

/// Explicit delay ladder; the last rung repeats.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledBackoff {
    pub delays: Vec<Duration>,
}

impl BackoffPolicy for ScheduledBackoff {
    fn delay(&self, failed_attempts: u32) -> Duration {
        let index = (failed_attempts.max(1) - 1) as usize;
        self.delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or_default()
    }

    fn name(&self) -> &'static str {
        "schedule"
    }
}

impl From<&BackoffConfig> for Arc<dyn BackoffPolicy> {
    fn from(config: &BackoffConfig) -> Self {
        match config {
            BackoffConfig::Fixed { delay_secs } => Arc::new(FixedBackoff {
                delay: Duration::from_secs(*delay_secs),
            }),
            BackoffConfig::Exponential {
                initial_delay_secs,
                max_delay_secs,
                multiplier,
            } => Arc::new(ExponentialBackoff {
                initial: Duration::from_secs(*initial_delay_secs),
                max: Duration::from_secs(*max_delay_secs),
                multiplier: *multiplier,
            }),
            BackoffConfig::Schedule { delays_secs } => Arc::new(ScheduledBackoff {
                delays: delays_secs.iter().map(|s| Duration::from_secs(*s)).collect(),
            }),
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp { reason: String },
}

/// Attempt cap plus backoff for one stage.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Arc<dyn BackoffPolicy>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Arc<dyn BackoffPolicy>) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, (&config.backoff).into())
    }

    /// Decide after attempt number `attempts_made` failed.
    pub fn decide(&self, attempts_made: u32, retryable: bool) -> RetryDecision {
        if !retryable {
            return RetryDecision::GiveUp {
                reason: "non-retryable failure".to_string(),
            };
        }
        if self.is_exhausted(attempts_made) {
            return RetryDecision::GiveUp {
                reason: format!("max attempts ({}) reached", self.max_attempts),
            };
        }
        RetryDecision::Retry {
            delay: self.backoff.delay(attempts_made),
        }
    }

    pub fn is_exhausted(&self, attempts_made: u32) -> bool {
        attempts_made >= self.max_attempts
    }
}
