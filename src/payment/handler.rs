//! Payment service event handler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::coordinator::{PaymentCoordinator, PaymentError, PaymentOutcome, PaymentRequest};
use crate::bus::{publish_event, MessageBus};
use crate::domain::{FailureCode, OrderId, PaymentRecord, PaymentStatus};
use crate::events::{Event, EventMeta, OrderPaymentFailed, OrderPaymentSucceeded};
use crate::worker::{HandlerError, MessageHandler};

impl From<PaymentError> for HandlerError {
    fn from(error: PaymentError) -> Self {
        match error {
            PaymentError::Storage(e) => HandlerError::Storage(e),
            other => HandlerError::Transient(other.to_string()),
        }
    }
}

/// Charges orders whose stock was confirmed.
pub struct PaymentEventHandler {
    payments: Arc<PaymentCoordinator>,
    bus: Arc<dyn MessageBus>,
}

impl PaymentEventHandler {
    pub fn new(payments: Arc<PaymentCoordinator>, bus: Arc<dyn MessageBus>) -> Self {
        Self { payments, bus }
    }
}

#[async_trait]
impl MessageHandler for PaymentEventHandler {
    fn name(&self) -> &str {
        "payment"
    }

    async fn handle(&self, event: Event, _attempt: u32) -> Result<(), HandlerError> {
        let e = match event {
            Event::OrderStockConfirmed(e) => e,
            other => {
                debug!(routing_key = %other.routing_key(), "Not a payment trigger, ignoring");
                return Ok(());
            }
        };

        let order_id = e.order_id;
        let outcome = self
            .payments
            .process_payment(PaymentRequest {
                event_id: e.meta.event_id,
                order_id,
                buyer_id: e.buyer_id,
                amount: e.amount,
                currency: e.currency,
                payment_method: e.payment_method,
            })
            .await?;

        let outbound = match outcome {
            PaymentOutcome::Success {
                payment_id,
                transaction_id,
                processed_at,
            } => succeeded(order_id, payment_id, transaction_id, processed_at),
            PaymentOutcome::Failed {
                payment_id,
                reason,
                code,
            } => failed(order_id, payment_id, reason, code),
            PaymentOutcome::AlreadyProcessed(record) => replay(record),
        };
        publish_event(self.bus.as_ref(), &outbound).await?;
        Ok(())
    }
}

fn succeeded(
    order_id: OrderId,
    payment_id: uuid::Uuid,
    transaction_id: String,
    processed_at: chrono::DateTime<Utc>,
) -> Event {
    OrderPaymentSucceeded {
        meta: EventMeta::new(Utc::now()),
        order_id,
        payment_id,
        transaction_id,
        processed_at,
    }
    .into()
}

fn failed(order_id: OrderId, payment_id: uuid::Uuid, reason: String, code: FailureCode) -> Event {
    OrderPaymentFailed {
        meta: EventMeta::new(Utc::now()),
        order_id,
        payment_id,
        reason,
        code,
    }
    .into()
}

/// The outcome event a terminal record stands for.
fn replay(record: PaymentRecord) -> Event {
    match record.status {
        PaymentStatus::Succeeded => succeeded(
            record.order_id,
            record.id,
            record.transaction_id.unwrap_or_default(),
            record.processed_at.unwrap_or(record.updated_at),
        ),
        _ => failed(
            record.order_id,
            record.id,
            record.failure_reason.unwrap_or_default(),
            record.failure_code.unwrap_or(FailureCode::Unknown),
        ),
    }
}
