use chrono::Utc;
use cucumber::{then, when};
use rust_decimal_macros::dec;
use uuid::Uuid;

use foodorder::domain::PaymentStatus;
use foodorder::events::{Event, EventMeta, OrderPaymentFailed};
use foodorder::payment::{PaymentOutcome, PaymentRequest};
use foodorder::worker::MessageHandler;

use super::SagaWorld;
use crate::common::card;

fn request(event_id: Uuid, order_id: i64, card_number: &str) -> PaymentRequest {
    PaymentRequest {
        event_id,
        order_id,
        buyer_id: "buyer-1".to_string(),
        amount: dec!(20.00),
        currency: "USD".to_string(),
        payment_method: Some(card(card_number)),
    }
}

#[when(expr = "payment is requested twice for order {int} with card {string}")]
async fn requested_twice(world: &mut SagaWorld, order_id: i64, card_number: String) {
    let event_id = Uuid::new_v4();
    for _ in 0..2 {
        let outcome = world
            .payments
            .process_payment(request(event_id, order_id, &card_number))
            .await
            .unwrap();
        world.payment_outcomes.push(outcome);
    }
}

#[then("the first payment succeeded")]
async fn first_succeeded(world: &mut SagaWorld) {
    assert!(matches!(
        world.payment_outcomes.first(),
        Some(PaymentOutcome::Success { .. })
    ));
}

#[then("the second payment is already processed with the same payment and transaction ids")]
async fn second_already_processed(world: &mut SagaWorld) {
    let (payment_id, transaction_id) = match &world.payment_outcomes[0] {
        PaymentOutcome::Success {
            payment_id,
            transaction_id,
            ..
        } => (*payment_id, transaction_id.clone()),
        other => panic!("unexpected {other:?}"),
    };
    match &world.payment_outcomes[1] {
        PaymentOutcome::AlreadyProcessed(record) => {
            assert_eq!(record.id, payment_id);
            assert_eq!(record.transaction_id.as_deref(), Some(transaction_id.as_str()));
            assert_eq!(record.status, PaymentStatus::Succeeded);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[then(expr = "the gateway was called {int} times")]
async fn gateway_calls(world: &mut SagaWorld, calls: u32) {
    assert_eq!(world.gateway.calls(), calls);
}

#[when(expr = "the order is charged with card {string}")]
async fn charged(world: &mut SagaWorld, card_number: String) {
    let order_id = world.order_id();
    let outcome = world
        .payments
        .process_payment(request(Uuid::new_v4(), order_id, &card_number))
        .await
        .unwrap();

    let (payment_id, reason, code) = match outcome {
        PaymentOutcome::Failed {
            payment_id,
            reason,
            code,
        } => (payment_id, reason, code),
        other => panic!("expected the charge to fail, got {other:?}"),
    };
    let event: Event = OrderPaymentFailed {
        meta: EventMeta::new(Utc::now()),
        order_id,
        payment_id,
        reason,
        code,
    }
    .into();
    let result = world.order_handler.handle(event, 1).await;
    world.handler_results.push(result.map_err(|e| e.to_string()));
}

#[then(expr = "the stock returned for the order lists menu item {int} with quantity {int}")]
async fn stock_returned_lists(world: &mut SagaWorld, menu_item_id: i64, quantity: u32) {
    let returned = world
        .bus
        .events()
        .await
        .into_iter()
        .find_map(|e| match e {
            Event::StockReturned(e) => Some(e),
            _ => None,
        })
        .expect("no order.stock-returned published");
    assert_eq!(returned.order_id, world.order_id());
    assert_eq!(returned.items.len(), 1);
    assert_eq!(returned.items[0].menu_item_id, menu_item_id);
    assert_eq!(returned.items[0].requested_quantity, quantity);
}
