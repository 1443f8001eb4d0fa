//! foodorder - choreographed order saga
//!
//! Three services own their own state and cooperate only through events on
//! a shared topic broker:
//!
//! - Order: accepts commands, owns the order state machine
//! - Menu: validates and reserves stock per order
//! - Payment: charges each order at most once
//!
//! ```text
//! order.created
//!   (grace period) -> order.awaiting-validation -> [Menu]
//!                                     stock.confirmed | stock.rejected -> [Order]
//!   order.stock-confirmed -> [Payment]
//!                                payment.succeeded | payment.failed -> [Order]
//!   order.stock-returned -> [Menu]            (compensation)
//!   order.status-changed -> buyer notification
//! ```
//!
//! Delivery is at-least-once; every handler is idempotent.

pub mod bus;
pub mod config;
pub mod domain;
pub mod events;
pub mod menu;
pub mod notification;
pub mod order;
pub mod payment;
pub mod services;
pub mod storage;
pub mod utils;
pub mod worker;
