//! Card charging.
//!
//! [`PaymentGateway`] is the seam to a payment processor. A charge either
//! produces an outcome (approved or declined) or fails with a
//! [`GatewayError`], which means the processor could not be reached and the
//! charge should be retried with the same idempotency key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{FailureCode, PaymentMethod};

/// The processor could not give an answer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Payment gateway timed out")]
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    /// Idempotency key: charging the same id twice charges once.
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: Option<PaymentMethod>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Success { transaction_id: String },
    Failed { reason: String, code: FailureCode },
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, GatewayError>;
}

/// Deterministic gateway keyed on the card's last four digits.
///
/// | last four | outcome |
/// |---|---|
/// | `0000` | declined (`CARD_DECLINED`) |
/// | `0001` | `INSUFFICIENT_FUNDS` |
/// | `0002` | `FRAUD_SUSPECTED` |
/// | `0003` | `CARD_EXPIRED` |
/// | `0005` | `GATEWAY_ERROR` |
/// | anything else | approved |
///
/// A missing card fails with `INVALID_CARD`.
#[derive(Default)]
pub struct SimulatedGateway {
    settled: RwLock<HashMap<Uuid, ChargeOutcome>>,
    pending_failures: AtomicU32,
    calls: AtomicU32,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` charges fail as unreachable.
    pub fn fail_next(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Charge calls received, including failed ones.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn decide(request: &ChargeRequest) -> ChargeOutcome {
        let Some(card) = &request.payment_method else {
            return ChargeOutcome::Failed {
                reason: "No payment method on order".to_string(),
                code: FailureCode::InvalidCard,
            };
        };
        if card.is_expired_at(Utc::now()) {
            return ChargeOutcome::Failed {
                reason: "Card has expired".to_string(),
                code: FailureCode::CardExpired,
            };
        }

        let declined = |reason: &str, code| ChargeOutcome::Failed {
            reason: reason.to_string(),
            code,
        };
        match card.last_four() {
            "0000" => declined("Card was declined by issuer", FailureCode::CardDeclined),
            "0001" => declined("Insufficient funds", FailureCode::InsufficientFunds),
            "0002" => declined("Transaction flagged as fraudulent", FailureCode::FraudSuspected),
            "0003" => declined("Card has expired", FailureCode::CardExpired),
            "0005" => declined("Processor returned an error", FailureCode::GatewayError),
            _ => ChargeOutcome::Success {
                transaction_id: format!("txn_{}", Uuid::new_v4().simple()),
            },
        }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GatewayError::Unavailable("simulated outage".to_string()));
        }

        let mut settled = self.settled.write().await;
        if let Some(outcome) = settled.get(&request.payment_id) {
            debug!(payment_id = %request.payment_id, "Charge already settled");
            return Ok(outcome.clone());
        }
        let outcome = Self::decide(request);
        settled.insert(request.payment_id, outcome.clone());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CardType;
    use rust_decimal_macros::dec;

    fn request(card_number: Option<&str>) -> ChargeRequest {
        ChargeRequest {
            payment_id: Uuid::new_v4(),
            amount: dec!(20.00),
            currency: "USD".to_string(),
            payment_method: card_number.map(|n| PaymentMethod {
                card_number: n.to_string(),
                card_holder_name: "Ada Lovelace".to_string(),
                expiration_month: 12,
                expiration_year: 2099,
                security_code: "123".to_string(),
                card_type: CardType::Visa,
            }),
        }
    }

    fn code(outcome: ChargeOutcome) -> Option<FailureCode> {
        match outcome {
            ChargeOutcome::Success { .. } => None,
            ChargeOutcome::Failed { code, .. } => Some(code),
        }
    }

    #[tokio::test]
    async fn test_outcome_follows_last_four() {
        let gateway = SimulatedGateway::new();
        let cases = [
            ("4242424242424242", None),
            ("4000000000000000", Some(FailureCode::CardDeclined)),
            ("4000000000000001", Some(FailureCode::InsufficientFunds)),
            ("4000000000000002", Some(FailureCode::FraudSuspected)),
            ("4000000000000003", Some(FailureCode::CardExpired)),
            ("4000000000000005", Some(FailureCode::GatewayError)),
        ];
        for (number, expected) in cases {
            let outcome = gateway.charge(&request(Some(number))).await.unwrap();
            assert_eq!(code(outcome), expected, "card {number}");
        }
    }

    #[tokio::test]
    async fn test_missing_card_is_invalid() {
        let outcome = SimulatedGateway::new().charge(&request(None)).await.unwrap();
        assert_eq!(code(outcome), Some(FailureCode::InvalidCard));
    }

    #[tokio::test]
    async fn test_same_payment_id_charges_once() {
        let gateway = SimulatedGateway::new();
        let req = request(Some("4242424242424242"));

        let first = gateway.charge(&req).await.unwrap();
        let second = gateway.charge(&req).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_forced_outage() {
        let gateway = SimulatedGateway::new();
        gateway.fail_next(1);
        let req = request(Some("4242424242424242"));

        assert!(matches!(
            gateway.charge(&req).await,
            Err(GatewayError::Unavailable(_))
        ));
        assert!(gateway.charge(&req).await.is_ok());
        assert_eq!(gateway.calls(), 2);
    }
}
