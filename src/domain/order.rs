//! Order aggregate: status, items, history.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payment_method::PaymentMethod;
use super::stock::StockValidationItem;

/// Server-assigned order identifier.
pub type OrderId = i64;

/// Menu item identifier (owned by the Menu service).
pub type MenuItemId = i64;

/// Number of decimal places money is scaled to.
pub const CURRENCY_SCALE: u32 = 2;

/// Lifecycle status of an order.
///
/// ```text
/// Submitted -> AwaitingValidation -> StockConfirmed -> Paid -> Shipped
///     \______________\___________________\
///                                          -> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Submitted,
    AwaitingValidation,
    StockConfirmed,
    Paid,
    Shipped,
    Cancelled,
}

impl OrderStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Submitted,
        OrderStatus::AwaitingValidation,
        OrderStatus::StockConfirmed,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Cancelled,
    ];

    /// Stable storage/wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Submitted => "Submitted",
            OrderStatus::AwaitingValidation => "AwaitingValidation",
            OrderStatus::StockConfirmed => "StockConfirmed",
            OrderStatus::Paid => "Paid",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    /// Inverse of [`OrderStatus::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line of an order. Prices are locked at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub menu_item_id: MenuItemId,
    pub menu_item_name: String,
    pub picture_url: Option<String>,
    #[serde(with = "rust_decimal::serde::str")]
    pub unit_price: Decimal,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub discount: Decimal,
}

impl OrderItem {
    /// `unit_price * quantity` before discount.
    pub fn gross(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    /// Line total after discount.
    pub fn total(&self) -> Decimal {
        self.gross() - self.discount
    }
}

/// One entry of the append-only status audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderHistoryEntry {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub request_id: Uuid,
    pub buyer_id: String,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub total_price: Decimal,
    pub payment_method: Option<PaymentMethod>,
    pub description: String,
    pub history: Vec<OrderHistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by every persisted update; updates are conditional on it.
    pub version: u64,
}

impl Order {
    /// Move to `to`, appending a history entry.
    ///
    /// Does not check the transition table; callers go through
    /// [`crate::order::state_machine`] first.
    pub fn record_transition(
        &mut self,
        to: OrderStatus,
        description: impl Into<String>,
        at: DateTime<Utc>,
    ) {
        let description = description.into();
        self.history.push(OrderHistoryEntry {
            order_id: self.id,
            status: to,
            description: description.clone(),
            created_at: at,
        });
        self.status = to;
        self.description = description;
        self.updated_at = at;
    }

    /// Items as the Menu service sees them.
    pub fn stock_items(&self) -> Vec<StockValidationItem> {
        self.items
            .iter()
            .map(|item| StockValidationItem {
                menu_item_id: item.menu_item_id,
                requested_quantity: item.quantity,
            })
            .collect()
    }
}

/// Sum of line totals, scaled to currency precision.
pub fn order_total(items: &[OrderItem]) -> Decimal {
    items
        .iter()
        .map(OrderItem::total)
        .sum::<Decimal>()
        .round_dp(CURRENCY_SCALE)
}

/// An order about to be inserted; the store assigns `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub request_id: Uuid,
    pub buyer_id: String,
    pub items: Vec<OrderItem>,
    pub total_price: Decimal,
    pub payment_method: Option<PaymentMethod>,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    /// Materialize with the id assigned by the store.
    pub fn into_order(self, id: OrderId) -> Order {
        Order {
            id,
            request_id: self.request_id,
            buyer_id: self.buyer_id,
            status: OrderStatus::Submitted,
            items: self.items,
            total_price: self.total_price,
            payment_method: self.payment_method,
            description: String::new(),
            history: Vec::new(),
            created_at: self.created_at,
            updated_at: self.created_at,
            version: 0,
        }
    }
}
