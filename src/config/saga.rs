//! Saga timing, payment and menu stock configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::domain::MenuItemId;

/// Order-side saga timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SagaConfig {
    /// How long a `Submitted` order waits before stock validation starts.
    pub grace_period_secs: u64,
    /// How often the watcher looks for expired grace periods.
    pub poll_interval_ms: u64,
    /// Upper bound on orders handled per watcher tick.
    pub batch_size: u32,
    /// ISO 4217 code sent with payment requests.
    pub currency: String,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 60,
            poll_interval_ms: 5_000,
            batch_size: 100,
            currency: "USD".to_string(),
        }
    }
}

impl SagaConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Payment service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    /// A `PROCESSING` record older than this is assumed abandoned and the
    /// charge is resumed.
    pub stale_processing_secs: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            stale_processing_secs: 300,
        }
    }
}

impl PaymentConfig {
    pub fn stale_processing(&self) -> Duration {
        Duration::from_secs(self.stale_processing_secs)
    }
}

/// Initial stock for one menu item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockSeed {
    pub menu_item_id: MenuItemId,
    pub quantity: u32,
}

/// Menu service settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MenuConfig {
    /// Stock levels applied at startup.
    pub stock: Vec<StockSeed>,
}
