//! Order service assembly.

use std::sync::Arc;

use crate::bus::MessageBus;
use crate::config::Config;
use crate::events::routing;
use crate::notification::NotificationSink;
use crate::order::{
    BuyerNotificationHandler, GracePeriodWatcher, OrderCommandService, OrderCoordinator,
    OrderEventHandler,
};
use crate::storage::OrderStores;
use crate::utils::retry::BackoffPolicy;
use crate::worker::MessageHandler;

use super::{ServiceError, ServiceHandle};

/// Saga inputs consumed by the Order service, as `(queue, binding)`.
pub const SAGA_QUEUES: [(&str, &str); 5] = [
    ("order-service.grace-period-expired", routing::ORDER_GRACE_PERIOD_EXPIRED),
    ("order-service.stock-confirmed", routing::STOCK_CONFIRMED),
    ("order-service.stock-rejected", routing::STOCK_REJECTED),
    ("order-service.payment-succeeded", routing::PAYMENT_SUCCEEDED),
    ("order-service.payment-failed", routing::PAYMENT_FAILED),
];

pub const NOTIFICATION_QUEUE: &str = "order-service.status-changed";

/// A running Order service.
pub struct OrderService {
    pub commands: Arc<OrderCommandService>,
    pub handle: ServiceHandle,
}

pub async fn start_order_service(
    config: &Config,
    stores: OrderStores,
    bus: Arc<dyn MessageBus>,
    notifications: Arc<dyn NotificationSink>,
) -> Result<OrderService, ServiceError> {
    let coordinator = Arc::new(OrderCoordinator::new(
        stores.orders.clone(),
        bus.clone(),
        config.saga.currency.clone(),
    ));
    let policy = BackoffPolicy::from(&config.retry);
    let mut handle = ServiceHandle::new("order");

    let saga: Arc<dyn MessageHandler> = Arc::new(OrderEventHandler::new(coordinator.clone()));
    for (queue, binding) in SAGA_QUEUES {
        handle
            .spawn_worker(&bus, queue, binding, saga.clone(), policy)
            .await?;
    }
    handle
        .spawn_worker(
            &bus,
            NOTIFICATION_QUEUE,
            routing::ORDER_STATUS_CHANGED,
            Arc::new(BuyerNotificationHandler::new(notifications)),
            policy,
        )
        .await?;

    let watcher = GracePeriodWatcher::new(
        stores.orders,
        bus,
        config.saga.grace_period(),
        config.saga.poll_interval(),
        config.saga.batch_size,
    );
    let shutdown = handle.shutdown_signal();
    handle.push(tokio::spawn(watcher.run(shutdown)));

    Ok(OrderService {
        commands: Arc::new(OrderCommandService::new(coordinator, stores.ledger)),
        handle,
    })
}
