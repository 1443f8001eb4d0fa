//! Events published by the Menu service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EventMeta;
use crate::domain::{OrderId, RejectedItem};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockConfirmed {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub order_id: OrderId,
    pub confirmed_at: DateTime<Utc>,
}

/// Lists exactly the items that could not be reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockRejected {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub order_id: OrderId,
    pub rejected_items: Vec<RejectedItem>,
    pub rejected_at: DateTime<Utc>,
}

impl StockRejected {
    /// Joined item descriptions, used as the cancellation reason.
    pub fn reason(&self) -> String {
        let details: Vec<String> = self.rejected_items.iter().map(RejectedItem::describe).collect();
        format!("Stock rejected: {}", details.join("; "))
    }
}
