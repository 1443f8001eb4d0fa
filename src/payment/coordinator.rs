//! One charge per order.
//!
//! The payment record is the dedupe key. A terminal record is returned as
//! [`PaymentOutcome::AlreadyProcessed`] so the caller can re-publish its
//! outcome. A `PENDING` record, or a `PROCESSING` record older than the
//! stale threshold, is resumed under its original payment id. A fresh
//! `PROCESSING` record belongs to someone else's in-flight charge: the
//! caller gets [`PaymentError::InFlight`] and retries later.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use super::gateway::{ChargeOutcome, ChargeRequest, GatewayError, PaymentGateway};
use crate::domain::{
    FailureCode, OrderId, PaymentMethod, PaymentRecord, PaymentStatus, PaymentStatusUpdate,
};
use crate::storage::{PaymentRepository, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment {payment_id} for order {order_id} is already being processed")]
    InFlight { payment_id: Uuid, order_id: OrderId },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// What to charge, taken from the triggering event.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub event_id: Uuid,
    pub order_id: OrderId,
    pub buyer_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: Option<PaymentMethod>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Success {
        payment_id: Uuid,
        transaction_id: String,
        processed_at: DateTime<Utc>,
    },
    Failed {
        payment_id: Uuid,
        reason: String,
        code: FailureCode,
    },
    /// The order was charged before; carries the terminal record.
    AlreadyProcessed(PaymentRecord),
}

pub struct PaymentCoordinator {
    payments: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    stale_after: Duration,
}

impl PaymentCoordinator {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        stale_after: Duration,
    ) -> Self {
        Self {
            payments,
            gateway,
            stale_after,
        }
    }

    #[tracing::instrument(name = "payment.process", skip_all, fields(order_id = request.order_id))]
    pub async fn process_payment(&self, request: PaymentRequest) -> Result<PaymentOutcome, PaymentError> {
        let now = Utc::now();
        let record = match self.payments.find_by_order_id(request.order_id).await? {
            Some(existing) => existing,
            None => {
                let pending = PaymentRecord::pending(
                    request.order_id,
                    request.buyer_id.clone(),
                    request.amount,
                    request.currency.clone(),
                    request.event_id,
                    now,
                );
                match self.payments.create(pending).await {
                    Ok(created) => created,
                    // A concurrent delivery created it first; its charge is in flight.
                    Err(StorageError::Duplicate { .. }) => {
                        return Err(self.in_flight(request.order_id).await?);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        match record.status {
            PaymentStatus::Succeeded | PaymentStatus::Failed => {
                info!(payment_id = %record.id, status = %record.status, "Payment already processed");
                return Ok(PaymentOutcome::AlreadyProcessed(record));
            }
            PaymentStatus::Processing if !self.is_stale(&record, now) => {
                return Err(PaymentError::InFlight {
                    payment_id: record.id,
                    order_id: record.order_id,
                });
            }
            PaymentStatus::Processing => {
                warn!(payment_id = %record.id, "Resuming stale payment");
            }
            PaymentStatus::Pending => {}
        }

        let record = self
            .payments
            .update_status(
                record.id,
                record.status,
                PaymentStatusUpdate::status(PaymentStatus::Processing, now),
            )
            .await?;

        self.charge(record, request.payment_method).await
    }

    async fn charge(
        &self,
        record: PaymentRecord,
        payment_method: Option<PaymentMethod>,
    ) -> Result<PaymentOutcome, PaymentError> {
        let charge = ChargeRequest {
            payment_id: record.id,
            amount: record.amount,
            currency: record.currency.clone(),
            payment_method,
        };

        let outcome = match self.gateway.charge(&charge).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(payment_id = %record.id, error = %e, "Charge did not complete");
                let reset = PaymentStatusUpdate::status(PaymentStatus::Pending, Utc::now());
                if let Err(reset_err) = self
                    .payments
                    .update_status(record.id, PaymentStatus::Processing, reset)
                    .await
                {
                    warn!(payment_id = %record.id, error = %reset_err, "Could not return payment to PENDING");
                }
                return Err(e.into());
            }
        };

        let now = Utc::now();
        match outcome {
            ChargeOutcome::Success { transaction_id } => {
                self.payments
                    .update_status(
                        record.id,
                        PaymentStatus::Processing,
                        PaymentStatusUpdate::succeeded(transaction_id.clone(), now),
                    )
                    .await?;
                info!(payment_id = %record.id, transaction_id = %transaction_id, "Payment succeeded");
                Ok(PaymentOutcome::Success {
                    payment_id: record.id,
                    transaction_id,
                    processed_at: now,
                })
            }
            ChargeOutcome::Failed { reason, code } => {
                self.payments
                    .update_status(
                        record.id,
                        PaymentStatus::Processing,
                        PaymentStatusUpdate::failed(reason.clone(), code, now),
                    )
                    .await?;
                info!(payment_id = %record.id, code = %code, reason = %reason, "Payment failed");
                Ok(PaymentOutcome::Failed {
                    payment_id: record.id,
                    reason,
                    code,
                })
            }
        }
    }

    fn is_stale(&self, record: &PaymentRecord, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(record.updated_at);
        age.to_std().map(|age| age >= self.stale_after).unwrap_or(false)
    }

    async fn in_flight(&self, order_id: OrderId) -> Result<PaymentError, PaymentError> {
        let record = self
            .payments
            .find_by_order_id(order_id)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "payment for order",
                id: order_id.to_string(),
            })?;
        Ok(PaymentError::InFlight {
            payment_id: record.id,
            order_id,
        })
    }
}
