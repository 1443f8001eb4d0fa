//! Load, guard, persist, publish.
//!
//! The shell around [`plan`]: every status change of an order, whether
//! triggered by an event or a command, goes through [`OrderCoordinator::advance`].

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use super::saga::{plan, Inbound, SagaContext, Step};
use super::state_machine::TransitionError;
use crate::bus::{publish_event, BusError, MessageBus};
use crate::domain::{Order, OrderId};
use crate::storage::{OrderRepository, StorageError};

/// Errors raised while advancing an order. All of them are worth retrying.
#[derive(Debug, thiserror::Error)]
pub enum AdvanceError {
    #[error("Order {0} not found")]
    OrderNotFound(OrderId),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Result of one advance attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Advanced {
    /// Persisted and published.
    Applied(Order),
    /// The order was already in the target status.
    AlreadyApplied(Order),
    /// The trigger does not apply to the order's status; nothing changed.
    Refused(Order, TransitionError),
}

impl Advanced {
    pub fn order(&self) -> &Order {
        match self {
            Advanced::Applied(order)
            | Advanced::AlreadyApplied(order)
            | Advanced::Refused(order, _) => order,
        }
    }
}

pub struct OrderCoordinator {
    orders: Arc<dyn OrderRepository>,
    bus: Arc<dyn MessageBus>,
    currency: String,
}

impl OrderCoordinator {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        bus: Arc<dyn MessageBus>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            orders,
            bus,
            currency: currency.into(),
        }
    }

    pub fn orders(&self) -> &Arc<dyn OrderRepository> {
        &self.orders
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    /// Apply `inbound` to the order.
    ///
    /// The update is conditional on the version that was read; losing a race
    /// returns `Storage(VersionConflict)`, and retrying observes the winner.
    /// Events are published only after the update commits. A repeated
    /// trigger re-sends the transition's requests to Menu and Payment, so a
    /// failed publish is recovered by redelivery.
    #[tracing::instrument(
        name = "order.advance",
        skip_all,
        fields(order_id = order_id, trigger = %inbound.trigger())
    )]
    pub async fn advance(&self, order_id: OrderId, inbound: Inbound) -> Result<Advanced, AdvanceError> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or(AdvanceError::OrderNotFound(order_id))?;

        let ctx = SagaContext {
            currency: self.currency.clone(),
            now: Utc::now(),
        };

        let (next, events) = match plan(&order, &inbound, &ctx) {
            Ok(Step::Apply { order, events }) => (order, events),
            Ok(Step::AlreadyApplied { replay }) => {
                debug!(
                    status = %order.status,
                    replayed = replay.len(),
                    "Already applied, re-sending downstream requests"
                );
                for event in &replay {
                    publish_event(self.bus.as_ref(), event).await?;
                }
                return Ok(Advanced::AlreadyApplied(order));
            }
            Err(e) => return Ok(Advanced::Refused(order, e)),
        };

        let saved = self.orders.update(&next).await?;
        info!(
            old_status = %order.status,
            new_status = %saved.status,
            version = saved.version,
            "Order status changed"
        );

        for event in &events {
            publish_event(self.bus.as_ref(), event).await?;
        }

        Ok(Advanced::Applied(saved))
    }
}
