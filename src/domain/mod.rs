//! Domain types shared by the Order, Menu and Payment services.

mod command;
mod order;
mod payment;
mod payment_method;
mod stock;

pub use command::{CommandType, CreateOrder, CreateOrderItem, ProcessedRequest, ValidationError};
pub use order::{
    order_total, MenuItemId, NewOrder, Order, OrderHistoryEntry, OrderId, OrderItem, OrderStatus,
    CURRENCY_SCALE,
};
pub use payment::{FailureCode, PaymentRecord, PaymentStatus, PaymentStatusUpdate};
pub use payment_method::{CardType, PaymentMethod};
pub use stock::{aggregate_items, RejectedItem, StockValidationItem};
