use std::str::FromStr;

use chrono::Utc;
use cucumber::{given, then, when};
use rust_decimal::Decimal;
use uuid::Uuid;

use foodorder::domain::RejectedItem;
use foodorder::events::{
    Event, EventMeta, GracePeriodExpired, OrderPaymentSucceeded, StockConfirmed, StockRejected,
};
use foodorder::worker::MessageHandler;

use super::{parse_status, SagaWorld};

fn saga_event(name: &str, order_id: i64) -> Event {
    let now = Utc::now();
    match name {
        "GracePeriodExpired" => GracePeriodExpired::new(order_id, now).into(),
        "StockConfirmed" => StockConfirmed {
            meta: EventMeta::new(now),
            order_id,
            confirmed_at: now,
        }
        .into(),
        "StockRejected" => StockRejected {
            meta: EventMeta::new(now),
            order_id,
            rejected_items: vec![RejectedItem {
                menu_item_id: 1,
                requested_quantity: 2,
                available_quantity: 1,
            }],
            rejected_at: now,
        }
        .into(),
        "PaymentSucceeded" => OrderPaymentSucceeded {
            meta: EventMeta::new(now),
            order_id,
            payment_id: Uuid::new_v4(),
            transaction_id: "txn_scenario".to_string(),
            processed_at: now,
        }
        .into(),
        other => panic!("no builder for event {other}"),
    }
}

#[given(expr = "an order in status {string}")]
async fn order_in_status(world: &mut SagaWorld, status: String) {
    world.seed_order(parse_status(&status)).await;
    world.bus.take_published().await;
}

#[when(expr = "a {string} event is delivered {int} times")]
async fn event_delivered(world: &mut SagaWorld, name: String, times: u32) {
    let event = saga_event(&name, world.order_id());
    for attempt in 1..=times {
        let result = world.order_handler.handle(event.clone(), attempt).await;
        world.handler_results.push(result.map_err(|e| e.to_string()));
    }
}

#[then(expr = "the order status is {string}")]
async fn order_status_is(world: &mut SagaWorld, status: String) {
    assert_eq!(world.current_order().await.status, parse_status(&status));
}

#[then(expr = "exactly {int} {string} event was published")]
async fn exactly_published(world: &mut SagaWorld, count: usize, routing_key: String) {
    let published = world
        .bus
        .routing_keys()
        .await
        .into_iter()
        .filter(|k| *k == routing_key)
        .count();
    assert_eq!(published, count, "{routing_key}");
}

#[then(expr = "the {string} request was sent {int} times")]
async fn request_sent(world: &mut SagaWorld, routing_key: String, count: usize) {
    exactly_published(world, count, routing_key).await;
}

#[then("no events were published")]
async fn nothing_published(world: &mut SagaWorld) {
    assert_eq!(world.bus.published_count().await, 0);
}

#[then("every delivery was acknowledged")]
async fn all_acked(world: &mut SagaWorld) {
    assert!(!world.handler_results.is_empty());
    for result in &world.handler_results {
        assert!(result.is_ok(), "{result:?}");
    }
}

#[then(expr = "the published payment request is for {word} {word}")]
async fn payment_request(world: &mut SagaWorld, amount: String, currency: String) {
    let expected = Decimal::from_str(&amount).unwrap();
    let request = world
        .bus
        .events()
        .await
        .into_iter()
        .find_map(|e| match e {
            Event::OrderStockConfirmed(e) => Some(e),
            _ => None,
        })
        .expect("no order.stock-confirmed published");
    assert_eq!(request.amount, expected);
    assert_eq!(request.currency, currency);
    assert!(request.payment_method.is_some());
}

#[then(expr = "the order description contains {string}")]
async fn description_contains(world: &mut SagaWorld, text: String) {
    let order = world.current_order().await;
    assert!(order.description.contains(&text), "{}", order.description);
}
