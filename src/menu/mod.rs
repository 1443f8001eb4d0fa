//! Menu service: stock levels and per-order reservations.

pub mod handler;
pub mod stock;

pub use handler::MenuEventHandler;
pub use stock::{StockCoordinator, StockOutcome};
