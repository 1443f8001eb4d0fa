//! Command-side inputs and the idempotency ledger entry.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::{order_total, MenuItemId, NewOrder, OrderId, OrderItem};
use super::payment_method::PaymentMethod;

/// Errors raised synchronously at the command boundary.
///
/// These never enter the saga.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Buyer id must not be blank")]
    MissingBuyer,

    #[error("Order must have items")]
    NoItems,

    #[error("Item {menu_item_id}: quantity must be at least 1")]
    NonPositiveQuantity { menu_item_id: MenuItemId },

    #[error("Item {menu_item_id}: unit price must not be negative")]
    NegativePrice { menu_item_id: MenuItemId },

    #[error("Item {menu_item_id}: discount must be between 0 and the line total")]
    InvalidDiscount { menu_item_id: MenuItemId },

    #[error("Card number is malformed")]
    MalformedCard,

    #[error("Card expired {month:02}/{year}")]
    CardExpired { month: u32, year: i32 },
}

/// One basket line submitted at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderItem {
    pub menu_item_id: MenuItemId,
    pub menu_item_name: String,
    pub picture_url: Option<String>,
    #[serde(with = "rust_decimal::serde::str")]
    pub unit_price: Decimal,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::str", default)]
    pub discount: Decimal,
}

/// Checkout command. `request_id` is the client's idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrder {
    pub request_id: Uuid,
    pub buyer_id: String,
    pub items: Vec<CreateOrderItem>,
    pub payment_method: Option<PaymentMethod>,
}

impl CreateOrder {
    /// Check the command without touching any store.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if self.buyer_id.trim().is_empty() {
            return Err(ValidationError::MissingBuyer);
        }
        if self.items.is_empty() {
            return Err(ValidationError::NoItems);
        }
        for item in &self.items {
            let menu_item_id = item.menu_item_id;
            if item.quantity < 1 {
                return Err(ValidationError::NonPositiveQuantity { menu_item_id });
            }
            if item.unit_price.is_sign_negative() {
                return Err(ValidationError::NegativePrice { menu_item_id });
            }
            let gross = item.unit_price * Decimal::from(item.quantity);
            if item.discount.is_sign_negative() || item.discount > gross {
                return Err(ValidationError::InvalidDiscount { menu_item_id });
            }
        }
        if let Some(card) = &self.payment_method {
            if !card.has_well_formed_number() {
                return Err(ValidationError::MalformedCard);
            }
            if card.is_expired_at(now) {
                return Err(ValidationError::CardExpired {
                    month: card.expiration_month,
                    year: card.expiration_year,
                });
            }
        }
        Ok(())
    }

    /// Build the row to insert. Prices are locked here.
    pub fn to_new_order(&self, now: DateTime<Utc>) -> NewOrder {
        let items: Vec<OrderItem> = self
            .items
            .iter()
            .map(|item| OrderItem {
                menu_item_id: item.menu_item_id,
                menu_item_name: item.menu_item_name.clone(),
                picture_url: item.picture_url.clone(),
                unit_price: item.unit_price,
                quantity: item.quantity,
                discount: item.discount,
            })
            .collect();

        NewOrder {
            request_id: self.request_id,
            buyer_id: self.buyer_id.clone(),
            total_price: order_total(&items),
            items,
            payment_method: self.payment_method.clone(),
            created_at: now,
        }
    }
}

/// Kinds of command recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    CreateOrder,
    CancelOrder,
    ShipOrder,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::CreateOrder => "CreateOrder",
            CommandType::CancelOrder => "CancelOrder",
            CommandType::ShipOrder => "ShipOrder",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CreateOrder" => Some(CommandType::CreateOrder),
            "CancelOrder" => Some(CommandType::CancelOrder),
            "ShipOrder" => Some(CommandType::ShipOrder),
            _ => None,
        }
    }
}

/// Idempotency ledger entry: one per distinct client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedRequest {
    pub request_id: Uuid,
    pub command_type: CommandType,
    /// Serialized outcome returned verbatim on retries.
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ProcessedRequest {
    /// Ledger entry written alongside a newly inserted order.
    pub fn order_created(request_id: Uuid, order_id: OrderId, at: DateTime<Utc>) -> Self {
        Self {
            request_id,
            command_type: CommandType::CreateOrder,
            result: Some(serde_json::json!({ "orderId": order_id })),
            created_at: at,
        }
    }

    /// `orderId` from the stored result, if any.
    pub fn order_id(&self) -> Option<OrderId> {
        self.result.as_ref()?.get("orderId")?.as_i64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CardType;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn command() -> CreateOrder {
        CreateOrder {
            request_id: Uuid::new_v4(),
            buyer_id: "buyer-1".to_string(),
            items: vec![CreateOrderItem {
                menu_item_id: 1,
                menu_item_name: "Pad Thai".to_string(),
                picture_url: None,
                unit_price: dec!(10.00),
                quantity: 2,
                discount: dec!(0),
            }],
            payment_method: Some(PaymentMethod {
                card_number: "4111111111114242".to_string(),
                card_holder_name: "Ada Lovelace".to_string(),
                expiration_month: 12,
                expiration_year: 2030,
                security_code: "123".to_string(),
                card_type: CardType::Visa,
            }),
        }
    }

    #[test]
    fn test_valid_command_passes() {
        assert_eq!(command().validate(now()), Ok(()));
    }

    #[test]
    fn test_rejects_empty_items() {
        let mut cmd = command();
        cmd.items.clear();
        assert_eq!(cmd.validate(now()), Err(ValidationError::NoItems));
    }

    #[test]
    fn test_rejects_zero_quantity() {
        let mut cmd = command();
        cmd.items[0].quantity = 0;
        assert_eq!(
            cmd.validate(now()),
            Err(ValidationError::NonPositiveQuantity { menu_item_id: 1 })
        );
    }

    #[test]
    fn test_rejects_discount_above_line_total() {
        let mut cmd = command();
        cmd.items[0].discount = dec!(20.01);
        assert_eq!(
            cmd.validate(now()),
            Err(ValidationError::InvalidDiscount { menu_item_id: 1 })
        );
    }

    #[test]
    fn test_rejects_expired_card() {
        let mut cmd = command();
        if let Some(card) = cmd.payment_method.as_mut() {
            card.expiration_year = 2025;
        }
        assert_eq!(
            cmd.validate(now()),
            Err(ValidationError::CardExpired {
                month: 12,
                year: 2025
            })
        );
    }

    #[test]
    fn test_new_order_locks_total() {
        let order = command().to_new_order(now());
        assert_eq!(order.total_price, dec!(20.00));
        assert_eq!(order.items[0].unit_price, dec!(10.00));
    }

    #[test]
    fn test_ledger_entry_carries_order_id() {
        let entry = ProcessedRequest::order_created(Uuid::new_v4(), 12, now());
        assert_eq!(entry.command_type, CommandType::CreateOrder);
        assert_eq!(entry.order_id(), Some(12));
    }

    #[test]
    fn test_command_type_names() {
        for ty in [
            CommandType::CreateOrder,
            CommandType::CancelOrder,
            CommandType::ShipOrder,
        ] {
            assert_eq!(CommandType::parse(ty.as_str()), Some(ty));
        }
    }
}
