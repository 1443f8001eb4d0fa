//! In-memory payment repository.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{OrderId, PaymentRecord, PaymentStatus, PaymentStatusUpdate};
use crate::storage::{PaymentRepository, Result, StorageError};

#[derive(Default)]
struct State {
    records: HashMap<Uuid, PaymentRecord>,
    by_order: HashMap<OrderId, Uuid>,
}

#[derive(Default)]
pub struct InMemoryPaymentStore {
    state: RwLock<State>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentStore {
    async fn create(&self, record: PaymentRecord) -> Result<PaymentRecord> {
        let mut state = self.state.write().await;
        if state.by_order.contains_key(&record.order_id) {
            return Err(StorageError::Duplicate {
                entity: "payment for order",
                key: record.order_id.to_string(),
            });
        }
        state.by_order.insert(record.order_id, record.id);
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentRecord>> {
        Ok(self.state.read().await.records.get(&id).cloned())
    }

    async fn find_by_order_id(&self, order_id: OrderId) -> Result<Option<PaymentRecord>> {
        let state = self.state.read().await;
        Ok(state
            .by_order
            .get(&order_id)
            .and_then(|id| state.records.get(id))
            .cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        update: PaymentStatusUpdate,
    ) -> Result<PaymentRecord> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "payment",
                id: id.to_string(),
            })?;

        if record.status != expected {
            return Err(StorageError::StatusConflict {
                payment_id: id,
                expected,
                actual: record.status,
            });
        }

        update.apply(record);
        Ok(record.clone())
    }
}
