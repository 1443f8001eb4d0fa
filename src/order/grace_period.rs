//! Delayed trigger that starts stock validation.
//!
//! Polls for `Submitted` orders older than the grace period and publishes a
//! `GracePeriodExpired` event for each. An order can be announced more than
//! once before its handler runs; the state machine makes repeats no-ops.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::coordinator::AdvanceError;
use crate::bus::{publish_typed, MessageBus};
use crate::events::GracePeriodExpired;
use crate::storage::OrderRepository;

pub struct GracePeriodWatcher {
    orders: Arc<dyn OrderRepository>,
    bus: Arc<dyn MessageBus>,
    grace_period: Duration,
    poll_interval: Duration,
    batch_size: u32,
}

impl GracePeriodWatcher {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        bus: Arc<dyn MessageBus>,
        grace_period: Duration,
        poll_interval: Duration,
        batch_size: u32,
    ) -> Self {
        Self {
            orders,
            bus,
            grace_period,
            poll_interval,
            batch_size: batch_size.max(1),
        }
    }

    /// Publish expiries for every order currently due. Returns how many.
    pub async fn tick(&self) -> Result<usize, AdvanceError> {
        let now = Utc::now();
        let grace = chrono::Duration::from_std(self.grace_period).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(grace).unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let due = self.orders.find_submitted_before(cutoff, self.batch_size).await?;
        for order in &due {
            debug!(order_id = order.id, "Grace period expired");
            publish_typed(self.bus.as_ref(), GracePeriodExpired::new(order.id, now)).await?;
        }
        Ok(due.len())
    }

    /// Tick every poll interval until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            grace_period_secs = self.grace_period.as_secs(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Grace period watcher started"
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "Grace period scan failed");
                    }
                }
            }
        }
        info!("Grace period watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockMessageBus;
    use crate::domain::{NewOrder, OrderStatus};
    use crate::events::Event;
    use crate::storage::InMemoryOrderStore;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn new_order(age: chrono::Duration) -> NewOrder {
        NewOrder {
            request_id: Uuid::new_v4(),
            buyer_id: "buyer-1".to_string(),
            items: Vec::new(),
            total_price: dec!(0),
            payment_method: None,
            created_at: Utc::now() - age,
        }
    }

    #[tokio::test]
    async fn test_tick_announces_only_expired_submitted_orders() {
        let store = Arc::new(InMemoryOrderStore::new());
        let bus = Arc::new(MockMessageBus::new());
        let old = store.create(new_order(chrono::Duration::minutes(5))).await.unwrap();
        store.create(new_order(chrono::Duration::zero())).await.unwrap();
        let mut advanced = store.create(new_order(chrono::Duration::minutes(5))).await.unwrap();
        advanced.record_transition(OrderStatus::AwaitingValidation, "", Utc::now());
        store.update(&advanced).await.unwrap();

        let watcher = GracePeriodWatcher::new(
            store,
            bus.clone(),
            Duration::from_secs(60),
            Duration::from_millis(10),
            10,
        );

        assert_eq!(watcher.tick().await.unwrap(), 1);
        match bus.events().await.as_slice() {
            [Event::GracePeriodExpired(e)] => assert_eq!(e.order_id, old.id),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let watcher = GracePeriodWatcher::new(
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(MockMessageBus::new()),
            Duration::ZERO,
            Duration::from_millis(5),
            10,
        );
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(watcher.run(rx));

        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
