use cucumber::{given, then, when};

use foodorder::domain::StockValidationItem;
use foodorder::menu::StockOutcome;
use foodorder::storage::StockStore;

use super::SagaWorld;

fn item(menu_item_id: i64, requested_quantity: u32) -> StockValidationItem {
    StockValidationItem {
        menu_item_id,
        requested_quantity,
    }
}

#[given(expr = "menu item {int} has {int} units in stock")]
async fn stock_level(world: &mut SagaWorld, menu_item_id: i64, quantity: u32) {
    world
        .stock
        .store()
        .set_available(menu_item_id, quantity)
        .await
        .unwrap();
}

#[when(expr = "order {int} requests {int} of item {int} and {int} of item {int}")]
async fn order_requests(
    world: &mut SagaWorld,
    order_id: i64,
    first_qty: u32,
    first_item: i64,
    second_qty: u32,
    second_item: i64,
) {
    let outcome = world
        .stock
        .validate_and_reserve(order_id, &[item(first_item, first_qty), item(second_item, second_qty)])
        .await
        .unwrap();
    world.stock_outcomes.push(outcome);
}

#[when(expr = "stock for order {int} is returned {int} times")]
async fn stock_returned(world: &mut SagaWorld, order_id: i64, times: u32) {
    for _ in 0..times {
        world.stock.return_stock(order_id).await.unwrap();
    }
}

#[then(expr = "the reservation is rejected listing only item {int} with {int} requested and {int} available")]
async fn rejected_listing(world: &mut SagaWorld, menu_item_id: i64, requested: u32, available: u32) {
    match world.stock_outcomes.last() {
        Some(StockOutcome::Failure { rejected_items, .. }) => {
            assert_eq!(rejected_items.len(), 1);
            let rejected = &rejected_items[0];
            assert_eq!(rejected.menu_item_id, menu_item_id);
            assert_eq!(rejected.requested_quantity, requested);
            assert_eq!(rejected.available_quantity, available);
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
}

#[then("the reservation is confirmed")]
async fn confirmed(world: &mut SagaWorld) {
    assert!(matches!(
        world.stock_outcomes.last(),
        Some(StockOutcome::Success { .. })
    ));
    assert!(world.stock_outcomes.windows(2).all(|w| w[0] == w[1]));
}

#[then(expr = "menu item {int} has {int} units available")]
async fn units_available(world: &mut SagaWorld, menu_item_id: i64, quantity: u32) {
    assert_eq!(
        world.stock.store().available(menu_item_id).await.unwrap(),
        quantity
    );
}
