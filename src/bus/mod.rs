//! Message transport for the order saga.
//!
//! This module contains:
//! - `MessageBus` trait: publish by routing key, subscribe a named queue to a
//!   topic binding
//! - `Delivery`: one received message with its ack/nack/reject handle
//! - Implementations: in-process channel broker, AMQP (RabbitMQ), mock, and a
//!   duplicating wrapper for exercising at-least-once delivery
//!
//! Delivery is at-least-once. A nacked message comes back on the same queue
//! after the transport's redelivery delay with its attempt count bumped; it
//! is never requeued at the head of the queue. A rejected message is
//! dead-lettered and not redelivered.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tracing::{debug, info};

use crate::config::{MessagingConfig, MessagingType};
use crate::events::{CodecError, Event, IntegrationEvent};

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod channel;
pub mod duplicating;
pub mod mock;
mod routing;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::AmqpMessageBus;
pub use channel::{ChannelBusConfig, ChannelMessageBus, DeadLetter};
pub use duplicating::{DuplicatingConfig, DuplicatingMessageBus, DuplicatingStats};
pub use mock::{recorded_delivery, MockMessageBus, PublishedMessage, Settlement, SettlementLog};
pub use routing::topic_matches;

// ============================================================================
// Errors
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Acknowledge failed: {0}")]
    Acknowledge(String),

    #[error("Bus is closed")]
    Closed,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

// ============================================================================
// Deliveries
// ============================================================================

/// Transport-specific settlement of one delivery.
#[async_trait]
pub trait Acker: Send + Sync {
    /// Processing succeeded; drop the message.
    async fn ack(&self) -> Result<()>;

    /// Processing failed; redeliver after the transport's delay.
    async fn nack(&self) -> Result<()>;

    /// Payload is unusable; dead-letter without redelivery.
    async fn reject(&self) -> Result<()>;
}

/// One message received from a queue.
///
/// Settling consumes the delivery, so each delivery is acked, nacked or
/// rejected at most once.
pub struct Delivery {
    pub routing_key: String,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(
        routing_key: impl Into<String>,
        payload: Vec<u8>,
        attempt: u32,
        acker: Box<dyn Acker>,
    ) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload,
            attempt,
            acker,
        }
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn nack(self) -> Result<()> {
        self.acker.nack().await
    }

    pub async fn reject(self) -> Result<()> {
        self.acker.reject().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("payload_len", &self.payload.len())
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// Stream of deliveries for one queue. Ends when the bus is closed.
pub type Subscription = BoxStream<'static, Delivery>;

// ============================================================================
// Traits
// ============================================================================

/// Publish/subscribe over a topic-routed broker.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload under a routing key.
    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<()>;

    /// Declare `queue`, bind it with `binding` (topic syntax: `*` matches one
    /// word, `#` zero or more) and start consuming it.
    ///
    /// Queues are durable and competing: deliveries published while nobody
    /// consumes are kept, and two subscriptions to the same queue share its
    /// messages.
    async fn subscribe(&self, queue: &str, binding: &str) -> Result<Subscription>;

    /// Stop all subscriptions and release the connection.
    async fn close(&self) -> Result<()>;
}

/// Encode and publish an event under its routing key.
pub async fn publish_event(bus: &dyn MessageBus, event: &Event) -> Result<()> {
    let routing_key = event.routing_key();
    let payload = event.encode()?;
    debug!(
        routing_key = %routing_key,
        event_id = %event.event_id(),
        "Publishing event"
    );
    bus.publish(routing_key, payload).await
}

/// Typed variant of [`publish_event`].
pub async fn publish_typed<E>(bus: &dyn MessageBus, event: E) -> Result<()>
where
    E: IntegrationEvent + Into<Event>,
{
    publish_event(bus, &event.into()).await
}

// ============================================================================
// Factory
// ============================================================================

/// Build the configured transport.
///
/// AMQP connections are retried with [`crate::utils::retry::connection_backoff`]
/// so a service can start before its broker.
pub async fn init_message_bus(config: &MessagingConfig) -> Result<Arc<dyn MessageBus>> {
    match config.messaging_type {
        MessagingType::Channel => {
            info!(messaging_type = "channel", "Message bus initialized");
            Ok(Arc::new(ChannelMessageBus::new(
                ChannelBusConfig::with_redelivery_delay(config.redelivery_delay()),
            )))
        }
        MessagingType::Amqp => {
            #[cfg(feature = "amqp")]
            {
                use backon::Retryable;

                let bus = (|| AmqpMessageBus::connect(config.amqp.clone(), config.redelivery_delay()))
                    .retry(crate::utils::retry::connection_backoff())
                    .notify(|err: &BusError, dur: std::time::Duration| {
                        tracing::warn!(error = %err, delay = ?dur, "Broker connection failed, retrying");
                    })
                    .await?;
                info!(messaging_type = "amqp", url = %config.amqp.url, "Message bus initialized");
                Ok(Arc::new(bus))
            }

            #[cfg(not(feature = "amqp"))]
            {
                Err(BusError::Connection(
                    "AMQP support requires the 'amqp' feature. Rebuild with --features amqp"
                        .to_string(),
                ))
            }
        }
    }
}
