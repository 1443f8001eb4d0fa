//! Messaging transport configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Messaging type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-process broker (no external dependency).
    #[default]
    Channel,
    /// AMQP/RabbitMQ broker.
    Amqp,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// Delay before a nacked message is redelivered, in milliseconds.
    pub redelivery_delay_ms: u64,
    /// AMQP-specific configuration.
    pub amqp: AmqpConfig,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            messaging_type: MessagingType::Channel,
            redelivery_delay_ms: 1_000,
            amqp: AmqpConfig::default(),
        }
    }
}

impl MessagingConfig {
    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }
}

/// AMQP-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AmqpConfig {
    /// AMQP connection URL.
    pub url: String,
    /// Topic exchange every service publishes to.
    pub exchange: String,
    /// Unacknowledged deliveries per consumer.
    pub prefetch: u16,
    /// Maximum pooled connections.
    pub pool_size: usize,
}

impl Default for AmqpConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            exchange: "foodorder.events".to_string(),
            prefetch: 10,
            pool_size: 4,
        }
    }
}
