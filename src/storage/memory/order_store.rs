//! In-memory order repository and idempotency ledger.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::paginate;
use crate::domain::{NewOrder, Order, OrderId, OrderStatus, ProcessedRequest};
use crate::storage::{
    IdempotencyRepository, OrderRepository, Page, PageRequest, Result, StorageError,
};

#[derive(Default)]
struct State {
    orders: BTreeMap<OrderId, Order>,
    by_request: HashMap<Uuid, OrderId>,
    ledger: HashMap<Uuid, ProcessedRequest>,
    last_id: OrderId,
}

/// Orders and the processed-request ledger under one lock, so order
/// creation and its ledger entry commit together.
#[derive(Default)]
pub struct InMemoryOrderStore {
    state: RwLock<State>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderStore {
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn find_by_request_id(&self, request_id: Uuid) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .by_request
            .get(&request_id)
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    async fn create(&self, order: NewOrder) -> Result<Order> {
        let mut state = self.state.write().await;
        if state.ledger.contains_key(&order.request_id) {
            return Err(StorageError::Duplicate {
                entity: "request",
                key: order.request_id.to_string(),
            });
        }

        state.last_id += 1;
        let id = state.last_id;
        let order = order.into_order(id);

        state.by_request.insert(order.request_id, id);
        state.ledger.insert(
            order.request_id,
            ProcessedRequest::order_created(order.request_id, id, order.created_at),
        );
        state.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn update(&self, order: &Order) -> Result<Order> {
        let mut state = self.state.write().await;
        let stored = state
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "order",
                id: order.id.to_string(),
            })?;

        if stored.version != order.version {
            return Err(StorageError::VersionConflict {
                order_id: order.id,
                expected: order.version,
                actual: stored.version,
            });
        }

        // History is append-only: keep what is stored, add what is new.
        let known = stored.history.len();
        stored
            .history
            .extend(order.history.iter().skip(known).cloned());
        stored.status = order.status;
        stored.description = order.description.clone();
        stored.updated_at = order.updated_at;
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn find_by_buyer_id(&self, buyer_id: &str, page: PageRequest) -> Result<Page<Order>> {
        let state = self.state.read().await;
        let matching = state
            .orders
            .values()
            .rev()
            .filter(|o| o.buyer_id == buyer_id)
            .collect();
        Ok(paginate(matching, page))
    }

    async fn find_all(&self, page: PageRequest) -> Result<Page<Order>> {
        let state = self.state.read().await;
        Ok(paginate(state.orders.values().rev().collect(), page))
    }

    async fn find_submitted_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Submitted && o.created_at <= cutoff)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IdempotencyRepository for InMemoryOrderStore {
    async fn find_by_request_id(&self, request_id: Uuid) -> Result<Option<ProcessedRequest>> {
        Ok(self.state.read().await.ledger.get(&request_id).cloned())
    }

    async fn save(&self, entry: ProcessedRequest) -> Result<()> {
        let mut state = self.state.write().await;
        if state.ledger.contains_key(&entry.request_id) {
            return Err(StorageError::Duplicate {
                entity: "request",
                key: entry.request_id.to_string(),
            });
        }
        state.ledger.insert(entry.request_id, entry);
        Ok(())
    }
}
