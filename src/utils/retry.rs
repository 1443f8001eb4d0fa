//! Retry utilities: backoff builders and the worker backoff policy.
//!
//! Uses `backon` builders for every delay sequence. Workers retry forever,
//! so their policies never run out of delays.

use std::time::Duration;

use backon::{BackoffBuilder, ConstantBuilder, ExponentialBuilder};

use crate::config::{RetryConfig, RetryPolicyType};

/// Backoff for broker connection retries.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Pause between a failed delivery and the next receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// The same delay after every failure.
    Fixed(Duration),
    /// Doubling from `min` up to `max`; resets after a success.
    Exponential { min: Duration, max: Duration },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Fixed(Duration::from_secs(1))
    }
}

impl BackoffPolicy {
    /// An endless sequence of delays.
    pub fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        match *self {
            BackoffPolicy::Fixed(delay) => Box::new(
                ConstantBuilder::default()
                    .with_delay(delay)
                    .with_max_times(usize::MAX)
                    .build(),
            ),
            BackoffPolicy::Exponential { min, max } => Box::new(
                ExponentialBuilder::default()
                    .with_min_delay(min)
                    .with_max_delay(max.max(min))
                    .with_max_times(usize::MAX)
                    .build(),
            ),
        }
    }
}

impl From<&RetryConfig> for BackoffPolicy {
    fn from(config: &RetryConfig) -> Self {
        let delay = Duration::from_millis(config.delay_ms);
        match config.policy {
            RetryPolicyType::Fixed => BackoffPolicy::Fixed(delay),
            RetryPolicyType::Exponential => BackoffPolicy::Exponential {
                min: delay,
                max: Duration::from_millis(config.max_delay_ms),
            },
        }
    }
}
