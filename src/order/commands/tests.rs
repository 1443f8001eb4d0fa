use super::*;
use crate::bus::MockMessageBus;
use crate::domain::{CreateOrderItem, OrderStatus};
use crate::events::Event;
use crate::storage::{InMemoryOrderStore, OrderRepository};
use rust_decimal_macros::dec;

struct Fixture {
    service: OrderCommandService,
    store: Arc<InMemoryOrderStore>,
    bus: Arc<MockMessageBus>,
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryOrderStore::new());
    let bus = Arc::new(MockMessageBus::new());
    let coordinator = Arc::new(OrderCoordinator::new(store.clone(), bus.clone(), "USD"));
    Fixture {
        service: OrderCommandService::new(coordinator, store.clone()),
        store,
        bus,
    }
}

fn command(request_id: Uuid) -> CreateOrder {
    CreateOrder {
        request_id,
        buyer_id: "buyer-1".to_string(),
        items: vec![CreateOrderItem {
            menu_item_id: 1,
            menu_item_name: "Pho".to_string(),
            picture_url: None,
            unit_price: dec!(10.00),
            quantity: 2,
            discount: dec!(0),
        }],
        payment_method: None,
    }
}

async fn set_status(store: &InMemoryOrderStore, order_id: OrderId, status: OrderStatus) {
    let mut order = store.find_by_id(order_id).await.unwrap().unwrap();
    order.record_transition(status, "test setup", Utc::now());
    store.update(&order).await.unwrap();
}

#[tokio::test]
async fn test_create_publishes_order_created() {
    let f = fixture();
    let result = f.service.create_order(command(Uuid::new_v4())).await.unwrap();

    assert!(!result.duplicate);
    let order = f.service.get_order(result.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Submitted);
    assert_eq!(order.total_price, dec!(20.00));

    match f.bus.events().await.as_slice() {
        [Event::OrderCreated(e)] => {
            assert_eq!(e.order_id, result.order_id);
            assert_eq!(e.total_price, dec!(20.00));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_repeated_create_returns_stored_result() {
    let f = fixture();
    let request_id = Uuid::new_v4();

    let first = f.service.create_order(command(request_id)).await.unwrap();
    let second = f.service.create_order(command(request_id)).await.unwrap();

    assert_eq!(second.order_id, first.order_id);
    assert!(second.duplicate);
    assert_eq!(f.bus.published_count().await, 1);
    assert_eq!(f.service.list_orders(PageRequest::default()).await.unwrap().total, 1);
}

#[tokio::test]
async fn test_invalid_command_is_rejected_synchronously() {
    let f = fixture();
    let mut cmd = command(Uuid::new_v4());
    cmd.items.clear();

    let err = f.service.create_order(cmd).await.unwrap_err();

    assert!(matches!(err, CommandError::Validation(ValidationError::NoItems)));
    assert_eq!(f.bus.published_count().await, 0);
}

#[tokio::test]
async fn test_cancel_after_stock_confirmed_returns_stock() {
    let f = fixture();
    let created = f.service.create_order(command(Uuid::new_v4())).await.unwrap();
    set_status(&f.store, created.order_id, OrderStatus::AwaitingValidation).await;
    set_status(&f.store, created.order_id, OrderStatus::StockConfirmed).await;
    f.bus.take_published().await;

    let outcome = f
        .service
        .cancel_order(Uuid::new_v4(), created.order_id, "buyer-1")
        .await
        .unwrap();

    assert_eq!(outcome.status, OrderStatus::Cancelled);
    assert_eq!(
        f.bus.routing_keys().await,
        vec!["order.cancelled", "order.stock-returned", "order.status-changed"]
    );
}

#[tokio::test]
async fn test_cancel_retried_after_publish_failure_returns_stock() {
    let f = fixture();
    let created = f.service.create_order(command(Uuid::new_v4())).await.unwrap();
    set_status(&f.store, created.order_id, OrderStatus::AwaitingValidation).await;
    set_status(&f.store, created.order_id, OrderStatus::StockConfirmed).await;
    f.bus.take_published().await;
    let request_id = Uuid::new_v4();

    f.bus.set_fail_on_publish(true).await;
    assert!(f
        .service
        .cancel_order(request_id, created.order_id, "buyer-1")
        .await
        .is_err());

    f.bus.set_fail_on_publish(false).await;
    let outcome = f
        .service
        .cancel_order(request_id, created.order_id, "buyer-1")
        .await
        .unwrap();

    assert_eq!(outcome.status, OrderStatus::Cancelled);
    assert!(!outcome.duplicate);
    assert_eq!(
        f.bus.routing_keys().await,
        vec!["order.cancelled", "order.stock-returned"]
    );
}

#[tokio::test]
async fn test_repeated_cancel_is_idempotent() {
    let f = fixture();
    let created = f.service.create_order(command(Uuid::new_v4())).await.unwrap();
    let request_id = Uuid::new_v4();

    f.service
        .cancel_order(request_id, created.order_id, "buyer-1")
        .await
        .unwrap();
    let published = f.bus.published_count().await;

    let again = f
        .service
        .cancel_order(request_id, created.order_id, "buyer-1")
        .await
        .unwrap();

    assert!(again.duplicate);
    assert_eq!(again.status, OrderStatus::Cancelled);
    assert_eq!(f.bus.published_count().await, published);
}

#[tokio::test]
async fn test_cancel_rejected_for_other_buyer_and_paid_orders() {
    let f = fixture();
    let created = f.service.create_order(command(Uuid::new_v4())).await.unwrap();

    let err = f
        .service
        .cancel_order(Uuid::new_v4(), created.order_id, "someone-else")
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::NotOwner { .. }));

    set_status(&f.store, created.order_id, OrderStatus::AwaitingValidation).await;
    set_status(&f.store, created.order_id, OrderStatus::StockConfirmed).await;
    set_status(&f.store, created.order_id, OrderStatus::Paid).await;

    let err = f
        .service
        .cancel_order(Uuid::new_v4(), created.order_id, "buyer-1")
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::InvalidTransition(_)));
}

#[tokio::test]
async fn test_ship_paid_order() {
    let f = fixture();
    let created = f.service.create_order(command(Uuid::new_v4())).await.unwrap();

    let err = f
        .service
        .ship_order(Uuid::new_v4(), created.order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::InvalidTransition(_)));

    set_status(&f.store, created.order_id, OrderStatus::AwaitingValidation).await;
    set_status(&f.store, created.order_id, OrderStatus::StockConfirmed).await;
    set_status(&f.store, created.order_id, OrderStatus::Paid).await;

    let outcome = f
        .service
        .ship_order(Uuid::new_v4(), created.order_id)
        .await
        .unwrap();
    assert_eq!(outcome.status, OrderStatus::Shipped);
}

#[tokio::test]
async fn test_request_id_cannot_be_reused_across_commands() {
    let f = fixture();
    let request_id = Uuid::new_v4();
    let created = f.service.create_order(command(request_id)).await.unwrap();

    let err = f
        .service
        .cancel_order(request_id, created.order_id, "buyer-1")
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::RequestIdReused { .. }));
}

#[tokio::test]
async fn test_list_orders_for_buyer() {
    let f = fixture();
    for _ in 0..3 {
        f.service.create_order(command(Uuid::new_v4())).await.unwrap();
    }
    let mut other = command(Uuid::new_v4());
    other.buyer_id = "buyer-2".to_string();
    f.service.create_order(other).await.unwrap();

    let page = f
        .service
        .list_orders_for_buyer("buyer-1", PageRequest::new(0, 2))
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);
    assert!(page.items.iter().all(|o| o.buyer_id == "buyer-1"));
}

#[tokio::test]
async fn test_get_unknown_order() {
    let f = fixture();
    assert!(matches!(
        f.service.get_order(404).await,
        Err(CommandError::OrderNotFound(404))
    ));
}
