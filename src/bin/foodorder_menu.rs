//! foodorder-menu: Menu service
//!
//! Validates and reserves stock for orders awaiting validation and releases
//! it when an order is cancelled. Initial levels come from `menu.stock`.

use tracing::{info, warn};

use foodorder::bus::init_message_bus;
use foodorder::config::{Config, MessagingType};
use foodorder::services::start_menu_service;
use foodorder::storage::stock_store;
use foodorder::utils::bootstrap::{init_tracing, wait_for_ctrl_c};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = Config::load(None)?;
    if config.messaging.messaging_type == MessagingType::Channel {
        warn!("Channel transport is in-process; no other service will see this one's events");
    }

    let store = stock_store(&config.storage).await?;
    let bus = init_message_bus(&config.messaging).await?;
    let service = start_menu_service(&config, store, bus.clone()).await?;
    info!(seeded = config.menu.stock.len(), "Menu service running");

    wait_for_ctrl_c().await;
    service.handle.shutdown(config.service.drain_timeout()).await;
    bus.close().await?;
    Ok(())
}
