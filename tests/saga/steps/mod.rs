//! Step definitions and the shared world.

mod end_to_end;
mod order;
mod payment;
mod stock;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cucumber::World;
use rust_decimal_macros::dec;
use uuid::Uuid;

use foodorder::bus::MockMessageBus;
use foodorder::domain::{NewOrder, Order, OrderId, OrderItem, OrderStatus};
use foodorder::menu::{StockCoordinator, StockOutcome};
use foodorder::order::{OrderCoordinator, OrderEventHandler};
use foodorder::payment::{PaymentCoordinator, PaymentOutcome, SimulatedGateway};
use foodorder::storage::{
    InMemoryOrderStore, InMemoryPaymentStore, InMemoryStockStore, OrderRepository,
};

use crate::common::{card, Saga};

#[derive(World)]
#[world(init = Self::new)]
pub struct SagaWorld {
    orders: Arc<InMemoryOrderStore>,
    bus: Arc<MockMessageBus>,
    order_handler: OrderEventHandler,
    stock: StockCoordinator,
    gateway: Arc<SimulatedGateway>,
    payments: PaymentCoordinator,
    current: Option<OrderId>,
    stock_outcomes: Vec<StockOutcome>,
    payment_outcomes: Vec<PaymentOutcome>,
    handler_results: Vec<Result<(), String>>,
    saga: Option<Saga>,
    saga_order: Option<Order>,
}

impl fmt::Debug for SagaWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaWorld")
            .field("current", &self.current)
            .field("stock_outcomes", &self.stock_outcomes)
            .field("payment_outcomes", &self.payment_outcomes)
            .field("handler_results", &self.handler_results)
            .finish_non_exhaustive()
    }
}

impl SagaWorld {
    fn new() -> Self {
        let orders = Arc::new(InMemoryOrderStore::new());
        let bus = Arc::new(MockMessageBus::new());
        let coordinator = Arc::new(OrderCoordinator::new(orders.clone(), bus.clone(), "USD"));
        let gateway = Arc::new(SimulatedGateway::new());
        Self {
            orders,
            bus,
            order_handler: OrderEventHandler::new(coordinator),
            stock: StockCoordinator::new(Arc::new(InMemoryStockStore::new())),
            payments: PaymentCoordinator::new(
                Arc::new(InMemoryPaymentStore::new()),
                gateway.clone(),
                Duration::from_secs(300),
            ),
            gateway,
            current: None,
            stock_outcomes: Vec::new(),
            payment_outcomes: Vec::new(),
            handler_results: Vec::new(),
            saga: None,
            saga_order: None,
        }
    }

    fn order_id(&self) -> OrderId {
        self.current.expect("no order in this scenario")
    }

    async fn current_order(&self) -> Order {
        self.orders
            .find_by_id(self.order_id())
            .await
            .unwrap()
            .expect("order vanished")
    }

    /// Insert a 2 x 10.00 order for menu item 1 and walk it to `status`.
    async fn seed_order(&mut self, status: OrderStatus) {
        let mut order = self
            .orders
            .create(NewOrder {
                request_id: Uuid::new_v4(),
                buyer_id: "buyer-1".to_string(),
                items: vec![OrderItem {
                    menu_item_id: 1,
                    menu_item_name: "Pho".to_string(),
                    picture_url: None,
                    unit_price: dec!(10.00),
                    quantity: 2,
                    discount: dec!(0),
                }],
                total_price: dec!(20.00),
                payment_method: Some(card("4242424242424242")),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        for step in path_to(status) {
            order.record_transition(*step, "scenario setup", Utc::now());
            order = self.orders.update(&order).await.unwrap();
        }
        self.current = Some(order.id);
    }
}

fn path_to(status: OrderStatus) -> &'static [OrderStatus] {
    use OrderStatus::*;
    match status {
        Submitted => &[],
        AwaitingValidation => &[AwaitingValidation],
        StockConfirmed => &[AwaitingValidation, StockConfirmed],
        Paid => &[AwaitingValidation, StockConfirmed, Paid],
        Shipped => &[AwaitingValidation, StockConfirmed, Paid, Shipped],
        Cancelled => &[Cancelled],
    }
}

fn parse_status(name: &str) -> OrderStatus {
    OrderStatus::parse(name).unwrap_or_else(|| panic!("unknown status {name}"))
}
