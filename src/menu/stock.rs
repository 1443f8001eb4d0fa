//! All-or-nothing stock reservation per order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::StockSeed;
use crate::domain::{OrderId, RejectedItem, StockValidationItem};
use crate::storage::{Result, StockDecision, StockStore};

/// Outcome of [`StockCoordinator::validate_and_reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockOutcome {
    Success {
        confirmed_at: DateTime<Utc>,
    },
    /// Nothing was reserved. `rejected_items` is empty when the order was
    /// released before validation ran.
    Failure {
        rejected_items: Vec<RejectedItem>,
        rejected_at: DateTime<Utc>,
    },
}

pub struct StockCoordinator {
    store: Arc<dyn StockStore>,
}

impl StockCoordinator {
    pub fn new(store: Arc<dyn StockStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn StockStore> {
        &self.store
    }

    /// Apply configured stock levels.
    pub async fn seed(&self, seeds: &[StockSeed]) -> Result<()> {
        for seed in seeds {
            self.store.set_available(seed.menu_item_id, seed.quantity).await?;
        }
        if !seeds.is_empty() {
            info!(items = seeds.len(), "Stock levels seeded");
        }
        Ok(())
    }

    /// Reserve every item or none.
    ///
    /// A repeated call for the same order returns the first decision.
    #[tracing::instrument(name = "menu.reserve", skip_all, fields(order_id = order_id))]
    pub async fn validate_and_reserve(
        &self,
        order_id: OrderId,
        items: &[StockValidationItem],
    ) -> Result<StockOutcome> {
        let reservation = self.store.reserve(order_id, items, Utc::now()).await?;
        if reservation.replayed {
            debug!(decision = ?reservation.decision, "Reservation already decided");
        }

        let at = reservation.decided_at;
        Ok(match reservation.decision {
            StockDecision::Reserved => StockOutcome::Success { confirmed_at: at },
            StockDecision::Rejected(rejected_items) => StockOutcome::Failure {
                rejected_items,
                rejected_at: at,
            },
            StockDecision::Voided => StockOutcome::Failure {
                rejected_items: Vec::new(),
                rejected_at: at,
            },
        })
    }

    /// Release whatever the order holds. Safe to repeat.
    #[tracing::instrument(name = "menu.release", skip_all, fields(order_id = order_id))]
    pub async fn return_stock(&self, order_id: OrderId) -> Result<Vec<StockValidationItem>> {
        let released = self.store.release(order_id, Utc::now()).await?;
        if released.is_empty() {
            debug!("Nothing held, release is a no-op");
        } else {
            info!(items = released.len(), "Stock returned");
        }
        Ok(released)
    }
}
