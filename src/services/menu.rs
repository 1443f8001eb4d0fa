//! Menu service assembly.

use std::sync::Arc;

use crate::bus::MessageBus;
use crate::config::Config;
use crate::events::routing;
use crate::menu::{MenuEventHandler, StockCoordinator};
use crate::storage::StockStore;
use crate::utils::retry::BackoffPolicy;
use crate::worker::MessageHandler;

use super::{ServiceError, ServiceHandle};

pub const QUEUES: [(&str, &str); 2] = [
    ("menu-service.awaiting-validation", routing::ORDER_AWAITING_VALIDATION),
    ("menu-service.stock-returned", routing::ORDER_STOCK_RETURNED),
];

/// A running Menu service.
pub struct MenuService {
    pub stock: Arc<StockCoordinator>,
    pub handle: ServiceHandle,
}

/// Seed configured stock, then start consuming.
pub async fn start_menu_service(
    config: &Config,
    store: Arc<dyn StockStore>,
    bus: Arc<dyn MessageBus>,
) -> Result<MenuService, ServiceError> {
    let stock = Arc::new(StockCoordinator::new(store));
    stock.seed(&config.menu.stock).await?;

    let policy = BackoffPolicy::from(&config.retry);
    let mut handle = ServiceHandle::new("menu");
    let handler: Arc<dyn MessageHandler> = Arc::new(MenuEventHandler::new(stock.clone(), bus.clone()));
    for (queue, binding) in QUEUES {
        handle
            .spawn_worker(&bus, queue, binding, handler.clone(), policy)
            .await?;
    }

    Ok(MenuService { stock, handle })
}
