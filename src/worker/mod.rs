//! Supervised consumer loop.
//!
//! One worker per subscribed queue. For each delivery the worker decodes the
//! payload, hands the event to a [`MessageHandler`] and settles the delivery
//! from the result:
//!
//! - handler succeeded: ack
//! - handler failed: nack, then pause for the policy's next delay; no retry
//!   limit
//! - payload undecodable: reject (dead-letter) and stop the worker with an
//!   error
//!
//! Shutdown is checked between deliveries; the in-flight message is always
//! finished first.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, Delivery, Subscription};
use crate::events::{CodecError, Event};
use crate::storage::StorageError;
use crate::utils::retry::BackoffPolicy;

#[cfg(test)]
mod tests;

/// Errors surfaced by message handlers.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Malformed message on {queue}: {source}")]
    Malformed {
        queue: String,
        #[source]
        source: CodecError,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("{0}")]
    Transient(String),
}

impl HandlerError {
    /// Redelivery cannot help.
    pub fn is_malformed(&self) -> bool {
        matches!(self, HandlerError::Malformed { .. })
    }
}

/// Reacts to decoded events from one queue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Process one event. `attempt` is 1 on first delivery.
    ///
    /// Returning `Err` nacks the delivery. Events the handler does not care
    /// about should return `Ok` so they are acked and dropped.
    async fn handle(&self, event: Event, attempt: u32) -> Result<(), HandlerError>;
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Acked,
    Nacked,
}

/// Consume `subscription` until shutdown, the stream ends, or a malformed
/// payload arrives.
pub async fn run_consumer(
    queue: String,
    mut subscription: Subscription,
    handler: Arc<dyn MessageHandler>,
    policy: BackoffPolicy,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), HandlerError> {
    info!(queue = %queue, handler = %handler.name(), "Worker started");
    let mut delays = policy.delays();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let delivery = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = subscription.next() => match next {
                Some(delivery) => delivery,
                None => {
                    debug!(queue = %queue, "Subscription ended");
                    break;
                }
            },
        };

        match process(&queue, handler.as_ref(), delivery).await {
            Ok(Disposition::Acked) => delays = policy.delays(),
            Ok(Disposition::Nacked) => {
                let delay = delays.next().unwrap_or_default();
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                error!(queue = %queue, error = %e, "Worker terminated");
                return Err(e);
            }
        }
    }

    info!(queue = %queue, "Worker stopped");
    Ok(())
}

#[tracing::instrument(
    name = "worker.process",
    skip_all,
    fields(queue = %queue, routing_key = %delivery.routing_key, attempt = delivery.attempt)
)]
async fn process(
    queue: &str,
    handler: &dyn MessageHandler,
    delivery: Delivery,
) -> Result<Disposition, HandlerError> {
    let event = match Event::decode(&delivery.routing_key, &delivery.payload) {
        Ok(event) => event,
        Err(source) => {
            return reject(queue, delivery, source).await;
        }
    };

    let attempt = delivery.attempt;
    match handler.handle(event, attempt).await {
        Ok(()) => {
            settle(delivery.ack().await, "ack");
            Ok(Disposition::Acked)
        }
        Err(HandlerError::Malformed { source, .. }) => reject(queue, delivery, source).await,
        Err(e) => {
            warn!(error = %e, attempt, "Handler failed, message will be redelivered");
            settle(delivery.nack().await, "nack");
            Ok(Disposition::Nacked)
        }
    }
}

async fn reject(
    queue: &str,
    delivery: Delivery,
    source: CodecError,
) -> Result<Disposition, HandlerError> {
    error!(error = %source, "Undecodable payload, dead-lettering");
    settle(delivery.reject().await, "reject");
    Err(HandlerError::Malformed {
        queue: queue.to_string(),
        source,
    })
}

/// A failed settlement is logged; the transport redelivers unsettled
/// messages on its own.
fn settle(result: crate::bus::Result<()>, action: &str) {
    if let Err(e) = result {
        warn!(action, error = %e, "Failed to settle delivery");
    }
}
