//! Worker retry and process lifecycle configuration.

use std::time::Duration;

use serde::Deserialize;

/// Retry policy discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicyType {
    /// Same delay after every failure.
    #[default]
    Fixed,
    /// Doubling delay, capped at `max_delay_ms`.
    Exponential,
}

/// How long a worker pauses after a failed delivery.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(rename = "type")]
    pub policy: RetryPolicyType,
    pub delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            policy: RetryPolicyType::Fixed,
            delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

/// Process lifecycle settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// How long shutdown waits for workers to finish in-flight messages.
    pub drain_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 10_000,
        }
    }
}

impl ServiceConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
