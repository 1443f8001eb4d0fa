//! foodorder-standalone: all three services in one process
//!
//! ## Architecture
//! ```text
//! foodorder-standalone
//!     ├── Order service   ─┐
//!     ├── Menu service    ─┼── one bus (channel by default, or AMQP)
//!     └── Payment service ─┘
//! ```
//!
//! Each service gets its own stores. With `storage.type: sqlite` they share
//! one database file but never each other's tables.

use std::sync::Arc;

use tracing::info;

use foodorder::bus::init_message_bus;
use foodorder::config::Config;
use foodorder::notification::LogNotificationSink;
use foodorder::payment::SimulatedGateway;
use foodorder::services::{start_menu_service, start_order_service, start_payment_service};
use foodorder::storage::{order_stores, payment_store, stock_store};
use foodorder::utils::bootstrap::{init_tracing, wait_for_ctrl_c};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = Config::load(None)?;
    let bus = init_message_bus(&config.messaging).await?;

    // Consumers first, so nothing published during startup is unrouted.
    let menu = start_menu_service(&config, stock_store(&config.storage).await?, bus.clone()).await?;
    let payment = start_payment_service(
        &config,
        payment_store(&config.storage).await?,
        Arc::new(SimulatedGateway::new()),
        bus.clone(),
    )
    .await?;
    let order = start_order_service(
        &config,
        order_stores(&config.storage).await?,
        bus.clone(),
        Arc::new(LogNotificationSink),
    )
    .await?;
    info!(
        messaging = ?config.messaging.messaging_type,
        storage = ?config.storage.storage_type,
        "Standalone runtime started"
    );

    wait_for_ctrl_c().await;
    let drain = config.service.drain_timeout();
    order.handle.shutdown(drain).await;
    payment.handle.shutdown(drain).await;
    menu.handle.shutdown(drain).await;
    bus.close().await?;
    Ok(())
}
