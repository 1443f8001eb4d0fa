//! Events published by the Order service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EventMeta;
use crate::domain::{Order, OrderId, OrderItem, OrderStatus, PaymentMethod, StockValidationItem};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub order_id: OrderId,
    pub request_id: Uuid,
    pub buyer_id: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_price: Decimal,
    pub items: Vec<OrderItem>,
}

impl OrderCreated {
    pub fn for_order(order: &Order, at: DateTime<Utc>) -> Self {
        Self {
            meta: EventMeta::new(at),
            order_id: order.id,
            request_id: order.request_id,
            buyer_id: order.buyer_id.clone(),
            total_price: order.total_price,
            items: order.items.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelled {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub order_id: OrderId,
    pub buyer_id: String,
    pub reason: String,
}

/// Emitted once per effective transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusChanged {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub order_id: OrderId,
    pub buyer_id: String,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub description: String,
}

/// Asks the Menu service to validate and reserve stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAwaitingValidation {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub order_id: OrderId,
    pub items: Vec<StockValidationItem>,
}

/// Asks the Menu service to release the order's reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockReturned {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub order_id: OrderId,
    pub items: Vec<StockValidationItem>,
}

/// Stock is held; carries what the Payment service needs to charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStockConfirmed {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub order_id: OrderId,
    pub buyer_id: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: Option<PaymentMethod>,
}

/// Delayed trigger moving a `Submitted` order on to validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GracePeriodExpired {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub order_id: OrderId,
}

impl GracePeriodExpired {
    pub fn new(order_id: OrderId, at: DateTime<Utc>) -> Self {
        Self {
            meta: EventMeta::new(at),
            order_id,
        }
    }
}
