//! Shared harness: all three services on one in-process broker.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use uuid::Uuid;

use foodorder::bus::{ChannelBusConfig, ChannelMessageBus, MessageBus};
use foodorder::config::{Config, StockSeed};
use foodorder::domain::{CardType, CreateOrder, CreateOrderItem, Order, OrderId, OrderStatus, PaymentMethod};
use foodorder::notification::MemoryNotificationSink;
use foodorder::order::OrderCommandService;
use foodorder::payment::SimulatedGateway;
use foodorder::services::{
    start_menu_service, start_order_service, start_payment_service, MenuService, OrderService,
    PaymentService,
};
use foodorder::storage::{
    InMemoryOrderStore, InMemoryPaymentStore, InMemoryStockStore, OrderStores, PaymentRepository,
    StockStore,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub struct Saga {
    pub bus: Arc<dyn MessageBus>,
    pub order: OrderService,
    pub menu: MenuService,
    pub payment: PaymentService,
    pub stock: Arc<InMemoryStockStore>,
    pub payments: Arc<InMemoryPaymentStore>,
    pub gateway: Arc<SimulatedGateway>,
    pub notifications: Arc<MemoryNotificationSink>,
}

impl Saga {
    /// Start the services over a fresh channel broker.
    pub async fn start(config: Config) -> Self {
        let bus: Arc<dyn MessageBus> = Arc::new(ChannelMessageBus::new(
            ChannelBusConfig::with_redelivery_delay(config.messaging.redelivery_delay()),
        ));
        Self::start_on(config, bus).await
    }

    pub async fn start_on(config: Config, bus: Arc<dyn MessageBus>) -> Self {
        let stock = Arc::new(InMemoryStockStore::new());
        let payments = Arc::new(InMemoryPaymentStore::new());
        let gateway = Arc::new(SimulatedGateway::new());
        let notifications = Arc::new(MemoryNotificationSink::new());
        let orders = Arc::new(InMemoryOrderStore::new());

        let menu = start_menu_service(&config, stock.clone(), bus.clone())
            .await
            .expect("menu service");
        let payment = start_payment_service(&config, payments.clone(), gateway.clone(), bus.clone())
            .await
            .expect("payment service");
        let order = start_order_service(
            &config,
            OrderStores {
                orders: orders.clone(),
                ledger: orders,
            },
            bus.clone(),
            notifications.clone(),
        )
        .await
        .expect("order service");

        Self {
            bus,
            order,
            menu,
            payment,
            stock,
            payments,
            gateway,
            notifications,
        }
    }

    pub fn commands(&self) -> &Arc<OrderCommandService> {
        &self.order.commands
    }

    pub async fn set_stock(&self, menu_item_id: i64, quantity: u32) {
        self.stock.set_available(menu_item_id, quantity).await.unwrap();
    }

    pub async fn available(&self, menu_item_id: i64) -> u32 {
        self.stock.available(menu_item_id).await.unwrap()
    }

    pub async fn payment_status(&self, order_id: OrderId) -> Option<foodorder::domain::PaymentStatus> {
        self.payments
            .find_by_order_id(order_id)
            .await
            .unwrap()
            .map(|r| r.status)
    }

    /// Poll until the order reaches `status`.
    pub async fn wait_for(&self, order_id: OrderId, status: OrderStatus) -> Order {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let order = self.commands().get_order(order_id).await.unwrap();
            if order.status == status {
                return order;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("order {order_id} stuck in {} waiting for {status}", order.status);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn stop(self) {
        let drain = Duration::from_secs(1);
        self.order.handle.shutdown(drain).await;
        self.payment.handle.shutdown(drain).await;
        self.menu.handle.shutdown(drain).await;
        self.bus.close().await.unwrap();
    }
}

/// Fast timings with `menu_item_id -> quantity` stock.
pub fn config_with_stock(stock: &[(i64, u32)]) -> Config {
    let mut config = Config::for_test();
    config.menu.stock = stock
        .iter()
        .map(|&(menu_item_id, quantity)| StockSeed {
            menu_item_id,
            quantity,
        })
        .collect();
    config
}

pub fn card(number: &str) -> PaymentMethod {
    PaymentMethod {
        card_number: number.to_string(),
        card_holder_name: "Ada Lovelace".to_string(),
        expiration_month: 12,
        expiration_year: 2099,
        security_code: "123".to_string(),
        card_type: CardType::Visa,
    }
}

/// One line of `quantity` x menu item at `unit_price`.
pub fn order_command(
    request_id: Uuid,
    menu_item_id: i64,
    quantity: u32,
    unit_price: Decimal,
    card_number: &str,
) -> CreateOrder {
    CreateOrder {
        request_id,
        buyer_id: "buyer-1".to_string(),
        items: vec![CreateOrderItem {
            menu_item_id,
            menu_item_name: format!("Item {menu_item_id}"),
            picture_url: None,
            unit_price,
            quantity,
            discount: Decimal::ZERO,
        }],
        payment_method: Some(card(card_number)),
    }
}
