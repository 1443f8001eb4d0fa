use std::str::FromStr;

use cucumber::{given, then, when};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{parse_status, SagaWorld};
use crate::common::{config_with_stock, order_command, Saga};

#[given(expr = "the services are running with {int} units of menu item {int}")]
async fn services_running(world: &mut SagaWorld, quantity: u32, menu_item_id: i64) {
    world.saga = Some(Saga::start(config_with_stock(&[(menu_item_id, quantity)])).await);
}

#[when(expr = "the buyer submits request {string} for {int} of menu item {int} at {word} with card {string}")]
async fn buyer_submits(
    world: &mut SagaWorld,
    request: String,
    quantity: u32,
    menu_item_id: i64,
    unit_price: String,
    card_number: String,
) {
    let saga = world.saga.as_ref().expect("services not running");
    let request_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, request.as_bytes());
    let created = saga
        .commands()
        .create_order(order_command(
            request_id,
            menu_item_id,
            quantity,
            Decimal::from_str(&unit_price).unwrap(),
            &card_number,
        ))
        .await
        .unwrap();
    world.saga_order = Some(saga.commands().get_order(created.order_id).await.unwrap());
}

#[then(expr = "the order eventually reaches {string}")]
async fn eventually_reaches(world: &mut SagaWorld, status: String) {
    let saga = world.saga.as_ref().expect("services not running");
    let order_id = world.saga_order.as_ref().expect("no order submitted").id;
    world.saga_order = Some(saga.wait_for(order_id, parse_status(&status)).await);
}

#[then(expr = "the order total is {word}")]
async fn order_total(world: &mut SagaWorld, total: String) {
    let order = world.saga_order.as_ref().expect("no order submitted");
    assert_eq!(order.total_price, Decimal::from_str(&total).unwrap());
}

#[then(expr = "the order history has {int} entries")]
async fn history_entries(world: &mut SagaWorld, entries: usize) {
    let order = world.saga_order.as_ref().expect("no order submitted");
    assert_eq!(order.history.len(), entries);
}

#[then(expr = "menu item {int} has {int} units left in the running menu")]
async fn units_left(world: &mut SagaWorld, menu_item_id: i64, quantity: u32) {
    let saga = world.saga.as_ref().expect("services not running");
    assert_eq!(saga.available(menu_item_id).await, quantity);
}
