//! Order service event handlers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::coordinator::{AdvanceError, Advanced, OrderCoordinator};
use super::saga::Inbound;
use crate::domain::OrderId;
use crate::events::Event;
use crate::notification::NotificationSink;
use crate::worker::{HandlerError, MessageHandler};

impl From<AdvanceError> for HandlerError {
    fn from(error: AdvanceError) -> Self {
        match error {
            AdvanceError::OrderNotFound(id) => HandlerError::NotFound {
                entity: "order",
                id: id.to_string(),
            },
            AdvanceError::Storage(e) => HandlerError::Storage(e),
            AdvanceError::Bus(e) => HandlerError::Bus(e),
        }
    }
}

/// Drives the order state machine from saga events.
///
/// Consumes grace-period expiries, stock decisions and payment outcomes.
pub struct OrderEventHandler {
    coordinator: Arc<OrderCoordinator>,
}

impl OrderEventHandler {
    pub fn new(coordinator: Arc<OrderCoordinator>) -> Self {
        Self { coordinator }
    }

    async fn advance(&self, order_id: OrderId, inbound: Inbound) -> Result<(), HandlerError> {
        match self.coordinator.advance(order_id, inbound).await? {
            Advanced::Refused(order, e) => {
                warn!(
                    order_id,
                    status = %order.status,
                    error = %e,
                    "Ignoring event for order in unexpected status"
                );
            }
            Advanced::Applied(_) | Advanced::AlreadyApplied(_) => {}
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for OrderEventHandler {
    fn name(&self) -> &str {
        "order-saga"
    }

    async fn handle(&self, event: Event, _attempt: u32) -> Result<(), HandlerError> {
        match event {
            Event::GracePeriodExpired(e) => self.advance(e.order_id, Inbound::GracePeriodExpired).await,
            Event::StockConfirmed(e) => self.advance(e.order_id, Inbound::StockConfirmed).await,
            Event::StockRejected(e) => {
                self.advance(e.order_id, Inbound::stock_rejected(&e)).await
            }
            Event::OrderPaymentSucceeded(e) => {
                self.advance(e.order_id, Inbound::PaymentSucceeded).await
            }
            Event::OrderPaymentFailed(e) => {
                self.advance(e.order_id, Inbound::payment_failed(&e)).await
            }
            other => {
                debug!(routing_key = %other.routing_key(), "Not an order saga event, ignoring");
                Ok(())
            }
        }
    }
}

/// Tells buyers about committed status changes.
pub struct BuyerNotificationHandler {
    sink: Arc<dyn NotificationSink>,
}

impl BuyerNotificationHandler {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl MessageHandler for BuyerNotificationHandler {
    fn name(&self) -> &str {
        "buyer-notifications"
    }

    async fn handle(&self, event: Event, _attempt: u32) -> Result<(), HandlerError> {
        match event {
            Event::OrderStatusChanged(e) => self
                .sink
                .order_status_changed(&e)
                .await
                .map_err(|e| HandlerError::Transient(e.to_string())),
            _ => Ok(()),
        }
    }
}
