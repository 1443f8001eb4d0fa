//! In-memory stock levels and reservation ledger.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::{aggregate_items, MenuItemId, OrderId, RejectedItem, StockValidationItem};
use crate::storage::{Reservation, Result, StockDecision, StockStore};

#[derive(Default)]
struct State {
    available: HashMap<MenuItemId, u32>,
    reservations: HashMap<OrderId, Reservation>,
}

#[derive(Default)]
pub struct InMemoryStockStore {
    state: RwLock<State>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with `(menu_item_id, quantity)` pairs.
    pub fn with_stock(levels: impl IntoIterator<Item = (MenuItemId, u32)>) -> Self {
        Self {
            state: RwLock::new(State {
                available: levels.into_iter().collect(),
                reservations: HashMap::new(),
            }),
        }
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn reserve(
        &self,
        order_id: OrderId,
        items: &[StockValidationItem],
        at: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.reservations.get(&order_id) {
            return Ok(Reservation {
                replayed: true,
                ..existing.clone()
            });
        }

        let items = aggregate_items(items);
        let rejected: Vec<RejectedItem> = items
            .iter()
            .filter_map(|item| {
                let available = state.available.get(&item.menu_item_id).copied().unwrap_or(0);
                (available < item.requested_quantity).then(|| RejectedItem {
                    menu_item_id: item.menu_item_id,
                    requested_quantity: item.requested_quantity,
                    available_quantity: available,
                })
            })
            .collect();

        let decision = if rejected.is_empty() {
            for item in &items {
                if let Some(level) = state.available.get_mut(&item.menu_item_id) {
                    *level = level.saturating_sub(item.requested_quantity);
                }
            }
            StockDecision::Reserved
        } else {
            StockDecision::Rejected(rejected)
        };

        let reservation = Reservation {
            order_id,
            items,
            decision,
            decided_at: at,
            released_at: None,
            replayed: false,
        };
        state.reservations.insert(order_id, reservation.clone());
        Ok(reservation)
    }

    async fn release(
        &self,
        order_id: OrderId,
        at: DateTime<Utc>,
    ) -> Result<Vec<StockValidationItem>> {
        let mut state = self.state.write().await;
        let State {
            available,
            reservations,
        } = &mut *state;

        let Some(reservation) = reservations.get_mut(&order_id) else {
            reservations.insert(
                order_id,
                Reservation {
                    order_id,
                    items: Vec::new(),
                    decision: StockDecision::Voided,
                    decided_at: at,
                    released_at: Some(at),
                    replayed: false,
                },
            );
            return Ok(Vec::new());
        };

        if reservation.decision != StockDecision::Reserved || reservation.released_at.is_some() {
            return Ok(Vec::new());
        }

        for item in &reservation.items {
            let level = available.entry(item.menu_item_id).or_insert(0);
            *level = level.saturating_add(item.requested_quantity);
        }
        reservation.released_at = Some(at);
        Ok(reservation.items.clone())
    }

    async fn available(&self, menu_item_id: MenuItemId) -> Result<u32> {
        Ok(self
            .state
            .read()
            .await
            .available
            .get(&menu_item_id)
            .copied()
            .unwrap_or(0))
    }

    async fn set_available(&self, menu_item_id: MenuItemId, quantity: u32) -> Result<()> {
        self.state
            .write()
            .await
            .available
            .insert(menu_item_id, quantity);
        Ok(())
    }
}
