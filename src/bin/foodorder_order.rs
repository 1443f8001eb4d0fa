//! foodorder-order: Order service
//!
//! Owns orders and their state machine. Consumes stock and payment outcomes,
//! runs the grace-period watcher and notifies buyers of status changes.
//!
//! ## Configuration
//! - `FOODORDER_CONFIG`: YAML file (default `foodorder.yaml` if present)
//! - `FOODORDER__MESSAGING__TYPE`: `amqp` to talk to the other services
//! - `FOODORDER__STORAGE__TYPE`: `memory` or `sqlite`

use std::sync::Arc;

use tracing::{info, warn};

use foodorder::bus::init_message_bus;
use foodorder::config::{Config, MessagingType};
use foodorder::notification::LogNotificationSink;
use foodorder::services::start_order_service;
use foodorder::storage::order_stores;
use foodorder::utils::bootstrap::{init_tracing, wait_for_ctrl_c};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = Config::load(None)?;
    if config.messaging.messaging_type == MessagingType::Channel {
        warn!("Channel transport is in-process; no other service will see this one's events");
    }

    let stores = order_stores(&config.storage).await?;
    let bus = init_message_bus(&config.messaging).await?;
    let service = start_order_service(
        &config,
        stores,
        bus.clone(),
        Arc::new(LogNotificationSink),
    )
    .await?;
    info!("Order service running");

    wait_for_ctrl_c().await;
    service.handle.shutdown(config.service.drain_timeout()).await;
    bus.close().await?;
    Ok(())
}
