//! foodorder-payment: Payment service
//!
//! Charges orders whose stock was confirmed, once per order, through the
//! simulated card gateway.

use std::sync::Arc;

use tracing::{info, warn};

use foodorder::bus::init_message_bus;
use foodorder::config::{Config, MessagingType};
use foodorder::payment::SimulatedGateway;
use foodorder::services::start_payment_service;
use foodorder::storage::payment_store;
use foodorder::utils::bootstrap::{init_tracing, wait_for_ctrl_c};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = Config::load(None)?;
    if config.messaging.messaging_type == MessagingType::Channel {
        warn!("Channel transport is in-process; no other service will see this one's events");
    }

    let store = payment_store(&config.storage).await?;
    let bus = init_message_bus(&config.messaging).await?;
    let service = start_payment_service(
        &config,
        store,
        Arc::new(SimulatedGateway::new()),
        bus.clone(),
    )
    .await?;
    info!("Payment service running");

    wait_for_ctrl_c().await;
    service.handle.shutdown(config.service.drain_timeout()).await;
    bus.close().await?;
    Ok(())
}
