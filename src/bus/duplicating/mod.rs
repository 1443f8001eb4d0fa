//! Duplicating bus wrapper for exercising at-least-once delivery.
//!
//! Wraps any `MessageBus` and publishes some messages twice, the way a
//! broker may redeliver after a lost ack. Consumers must treat the second
//! copy as a no-op.
//!
//! # Example
//!
//! ```ignore
//! use foodorder::bus::{ChannelMessageBus, DuplicatingConfig, DuplicatingMessageBus};
//!
//! // Duplicate every message
//! let bus = DuplicatingMessageBus::new(ChannelMessageBus::default(), DuplicatingConfig::always());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use super::{MessageBus, Result, Subscription};

/// Configuration for duplicating behaviour.
#[derive(Clone, Debug)]
pub struct DuplicatingConfig {
    /// Probability of publishing a message twice (0.0 to 1.0).
    pub duplicate_rate: f64,
}

impl Default for DuplicatingConfig {
    fn default() -> Self {
        Self::none()
    }
}

impl DuplicatingConfig {
    /// Never duplicate (pass-through).
    pub fn none() -> Self {
        Self {
            duplicate_rate: 0.0,
        }
    }

    /// Duplicate with the given probability, clamped to `0.0..=1.0`.
    pub fn with_rate(rate: f64) -> Self {
        Self {
            duplicate_rate: rate.clamp(0.0, 1.0),
        }
    }

    /// Duplicate every message.
    pub fn always() -> Self {
        Self {
            duplicate_rate: 1.0,
        }
    }

    pub fn is_duplicating(&self) -> bool {
        self.duplicate_rate > 0.0
    }
}

/// Counters for the duplicating bus.
#[derive(Debug, Default)]
pub struct DuplicatingStats {
    /// Messages received for publish.
    pub total: AtomicU64,
    /// Messages published a second time.
    pub duplicated: AtomicU64,
}

impl DuplicatingStats {
    /// `(total, duplicated)`.
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.total.load(Ordering::Relaxed),
            self.duplicated.load(Ordering::Relaxed),
        )
    }
}

/// Wrapper that publishes some messages twice.
pub struct DuplicatingMessageBus<B: MessageBus> {
    inner: B,
    config: DuplicatingConfig,
    stats: DuplicatingStats,
}

impl<B: MessageBus> DuplicatingMessageBus<B> {
    pub fn new(inner: B, config: DuplicatingConfig) -> Self {
        if config.is_duplicating() {
            warn!(
                duplicate_rate = config.duplicate_rate,
                "Duplicating message bus enabled - messages may be delivered twice"
            );
        }

        Self {
            inner,
            config,
            stats: DuplicatingStats::default(),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn stats(&self) -> &DuplicatingStats {
        &self.stats
    }

    fn should_duplicate(&self) -> bool {
        if self.config.duplicate_rate <= 0.0 {
            return false;
        }
        if self.config.duplicate_rate >= 1.0 {
            return true;
        }
        rand::rng().random_bool(self.config.duplicate_rate)
    }
}

#[async_trait]
impl<B: MessageBus> MessageBus for DuplicatingMessageBus<B> {
    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        self.stats.total.fetch_add(1, Ordering::Relaxed);

        if self.should_duplicate() {
            self.inner.publish(routing_key, payload.clone()).await?;
            self.stats.duplicated.fetch_add(1, Ordering::Relaxed);
            debug!(routing_key = %routing_key, "Duplicating bus published message twice");
        }

        self.inner.publish(routing_key, payload).await
    }

    async fn subscribe(&self, queue: &str, binding: &str) -> Result<Subscription> {
        self.inner.subscribe(queue, binding).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
