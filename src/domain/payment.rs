//! Payment records owned by the Payment service.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::OrderId;

/// Processing status of a payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Succeeded | PaymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Succeeded => "SUCCEEDED",
            PaymentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(PaymentStatus::Pending),
            "PROCESSING" => Some(PaymentStatus::Processing),
            "SUCCEEDED" => Some(PaymentStatus::Succeeded),
            "FAILED" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a declined or failed charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    InsufficientFunds,
    CardDeclined,
    CardExpired,
    InvalidCard,
    FraudSuspected,
    GatewayError,
    Timeout,
    Unknown,
}

impl FailureCode {
    pub const ALL: [FailureCode; 8] = [
        FailureCode::InsufficientFunds,
        FailureCode::CardDeclined,
        FailureCode::CardExpired,
        FailureCode::InvalidCard,
        FailureCode::FraudSuspected,
        FailureCode::GatewayError,
        FailureCode::Timeout,
        FailureCode::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::InsufficientFunds => "INSUFFICIENT_FUNDS",
            FailureCode::CardDeclined => "CARD_DECLINED",
            FailureCode::CardExpired => "CARD_EXPIRED",
            FailureCode::InvalidCard => "INVALID_CARD",
            FailureCode::FraudSuspected => "FRAUD_SUSPECTED",
            FailureCode::GatewayError => "GATEWAY_ERROR",
            FailureCode::Timeout => "TIMEOUT",
            FailureCode::Unknown => "UNKNOWN",
        }
    }

    /// Unrecognised codes map to `Unknown`.
    pub fn parse(value: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == value)
            .unwrap_or(FailureCode::Unknown)
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One payment attempt per order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub order_id: OrderId,
    pub buyer_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub failure_code: Option<FailureCode>,
    /// Event that created this record.
    pub event_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl PaymentRecord {
    /// A fresh `PENDING` record.
    pub fn pending(
        order_id: OrderId,
        buyer_id: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            buyer_id: buyer_id.into(),
            amount,
            currency: currency.into(),
            status: PaymentStatus::Pending,
            transaction_id: None,
            failure_reason: None,
            failure_code: None,
            event_id,
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }
}

/// Field changes applied by `PaymentRepository::update_status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentStatusUpdate {
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub failure_code: Option<FailureCode>,
    pub processed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentStatusUpdate {
    pub fn status(status: PaymentStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            transaction_id: None,
            failure_reason: None,
            failure_code: None,
            processed_at: None,
            updated_at: at,
        }
    }

    pub fn succeeded(transaction_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: PaymentStatus::Succeeded,
            transaction_id: Some(transaction_id.into()),
            failure_reason: None,
            failure_code: None,
            processed_at: Some(at),
            updated_at: at,
        }
    }

    pub fn failed(reason: impl Into<String>, code: FailureCode, at: DateTime<Utc>) -> Self {
        Self {
            status: PaymentStatus::Failed,
            transaction_id: None,
            failure_reason: Some(reason.into()),
            failure_code: Some(code),
            processed_at: Some(at),
            updated_at: at,
        }
    }

    /// Apply to a record in place.
    pub fn apply(&self, record: &mut PaymentRecord) {
        record.status = self.status;
        record.transaction_id = self.transaction_id.clone();
        record.failure_reason = self.failure_reason.clone();
        record.failure_code = self.failure_code;
        record.processed_at = self.processed_at;
        record.updated_at = self.updated_at;
    }
}
