//! Payment service assembly.

use std::sync::Arc;

use crate::bus::MessageBus;
use crate::config::Config;
use crate::events::routing;
use crate::payment::{PaymentCoordinator, PaymentEventHandler, PaymentGateway};
use crate::storage::PaymentRepository;
use crate::utils::retry::BackoffPolicy;

use super::{ServiceError, ServiceHandle};

pub const QUEUE: &str = "payment-service.stock-confirmed";

/// A running Payment service.
pub struct PaymentService {
    pub payments: Arc<PaymentCoordinator>,
    pub handle: ServiceHandle,
}

pub async fn start_payment_service(
    config: &Config,
    store: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    bus: Arc<dyn MessageBus>,
) -> Result<PaymentService, ServiceError> {
    let payments = Arc::new(PaymentCoordinator::new(
        store,
        gateway,
        config.payment.stale_processing(),
    ));

    let mut handle = ServiceHandle::new("payment");
    handle
        .spawn_worker(
            &bus,
            QUEUE,
            routing::ORDER_STOCK_CONFIRMED,
            Arc::new(PaymentEventHandler::new(payments.clone(), bus.clone())),
            BackoffPolicy::from(&config.retry),
        )
        .await?;

    Ok(PaymentService { payments, handle })
}
