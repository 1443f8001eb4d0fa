//! Events published by the Payment service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EventMeta;
use crate::domain::{FailureCode, OrderId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPaymentSucceeded {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub order_id: OrderId,
    pub payment_id: Uuid,
    pub transaction_id: String,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPaymentFailed {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub order_id: OrderId,
    pub payment_id: Uuid,
    pub reason: String,
    pub code: FailureCode,
}
