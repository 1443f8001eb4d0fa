//! Menu service event handler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use super::stock::{StockCoordinator, StockOutcome};
use crate::bus::{publish_typed, MessageBus};
use crate::events::{Event, EventMeta, StockConfirmed, StockRejected};
use crate::worker::{HandlerError, MessageHandler};

/// Answers validation requests and releases returned stock.
///
/// Decisions are re-published on redelivery: the first publish may have
/// been lost after the reservation committed.
pub struct MenuEventHandler {
    stock: Arc<StockCoordinator>,
    bus: Arc<dyn MessageBus>,
}

impl MenuEventHandler {
    pub fn new(stock: Arc<StockCoordinator>, bus: Arc<dyn MessageBus>) -> Self {
        Self { stock, bus }
    }
}

#[async_trait]
impl MessageHandler for MenuEventHandler {
    fn name(&self) -> &str {
        "menu-stock"
    }

    async fn handle(&self, event: Event, _attempt: u32) -> Result<(), HandlerError> {
        match event {
            Event::OrderAwaitingValidation(e) => {
                let outcome = self.stock.validate_and_reserve(e.order_id, &e.items).await?;
                match outcome {
                    StockOutcome::Success { confirmed_at } => {
                        info!(order_id = e.order_id, "Stock confirmed");
                        publish_typed(
                            self.bus.as_ref(),
                            StockConfirmed {
                                meta: EventMeta::new(Utc::now()),
                                order_id: e.order_id,
                                confirmed_at,
                            },
                        )
                        .await?;
                    }
                    StockOutcome::Failure {
                        rejected_items,
                        rejected_at,
                    } => {
                        info!(
                            order_id = e.order_id,
                            rejected = rejected_items.len(),
                            "Stock rejected"
                        );
                        publish_typed(
                            self.bus.as_ref(),
                            StockRejected {
                                meta: EventMeta::new(Utc::now()),
                                order_id: e.order_id,
                                rejected_items,
                                rejected_at,
                            },
                        )
                        .await?;
                    }
                }
                Ok(())
            }
            Event::StockReturned(e) => {
                self.stock.return_stock(e.order_id).await?;
                Ok(())
            }
            other => {
                debug!(routing_key = %other.routing_key(), "Not a menu event, ignoring");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockMessageBus;
    use crate::domain::StockValidationItem;
    use crate::events::{OrderAwaitingValidation, StockReturned};
    use crate::storage::InMemoryStockStore;

    fn items() -> Vec<StockValidationItem> {
        vec![StockValidationItem {
            menu_item_id: 1,
            requested_quantity: 2,
        }]
    }

    fn awaiting(order_id: i64) -> Event {
        OrderAwaitingValidation {
            meta: EventMeta::new(Utc::now()),
            order_id,
            items: items(),
        }
        .into()
    }

    fn handler(level: u32) -> (MenuEventHandler, Arc<StockCoordinator>, Arc<MockMessageBus>) {
        let stock = Arc::new(StockCoordinator::new(Arc::new(
            InMemoryStockStore::with_stock([(1, level)]),
        )));
        let bus = Arc::new(MockMessageBus::new());
        (MenuEventHandler::new(stock.clone(), bus.clone()), stock, bus)
    }

    #[tokio::test]
    async fn test_confirms_and_republishes_on_redelivery() {
        let (handler, stock, bus) = handler(3);

        handler.handle(awaiting(9), 1).await.unwrap();
        handler.handle(awaiting(9), 2).await.unwrap();

        assert_eq!(
            bus.routing_keys().await,
            vec!["stock.confirmed", "stock.confirmed"]
        );
        assert_eq!(stock.store().available(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejects_when_short() {
        let (handler, _, bus) = handler(1);

        handler.handle(awaiting(9), 1).await.unwrap();

        match bus.events().await.as_slice() {
            [Event::StockRejected(e)] => {
                assert_eq!(e.order_id, 9);
                assert_eq!(e.rejected_items[0].available_quantity, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stock_returned_releases() {
        let (handler, stock, bus) = handler(3);
        handler.handle(awaiting(9), 1).await.unwrap();

        let returned: Event = StockReturned {
            meta: EventMeta::new(Utc::now()),
            order_id: 9,
            items: items(),
        }
        .into();
        handler.handle(returned.clone(), 1).await.unwrap();
        handler.handle(returned, 2).await.unwrap();

        assert_eq!(stock.store().available(1).await.unwrap(), 3);
        assert_eq!(bus.published_count().await, 1);
    }
}
