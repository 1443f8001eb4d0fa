//! Mock message bus for testing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Acker, BusError, Delivery, MessageBus, Result, Subscription};
use crate::events::Event;

/// A message captured by [`MockMessageBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub routing_key: String,
    pub payload: Vec<u8>,
}

/// Mock bus that records publishes instead of delivering them.
#[derive(Default)]
pub struct MockMessageBus {
    published: RwLock<Vec<PublishedMessage>>,
    fail_on_publish: RwLock<bool>,
    closed: RwLock<bool>,
}

impl MockMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn take_published(&self) -> Vec<PublishedMessage> {
        std::mem::take(&mut *self.published.write().await)
    }

    /// Published routing keys, in publish order.
    pub async fn routing_keys(&self) -> Vec<String> {
        self.published
            .read()
            .await
            .iter()
            .map(|m| m.routing_key.clone())
            .collect()
    }

    /// Decode everything published so far.
    pub async fn events(&self) -> Vec<Event> {
        self.published
            .read()
            .await
            .iter()
            .filter_map(|m| Event::decode(&m.routing_key, &m.payload).ok())
            .collect()
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.read().await
    }
}

#[async_trait]
impl MessageBus for MockMessageBus {
    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        if *self.fail_on_publish.read().await {
            return Err(BusError::Connection("Mock publish failure".to_string()));
        }
        self.published.write().await.push(PublishedMessage {
            routing_key: routing_key.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, queue: &str, _binding: &str) -> Result<Subscription> {
        Err(BusError::Subscribe(format!(
            "mock bus does not deliver (queue '{queue}')"
        )))
    }

    async fn close(&self) -> Result<()> {
        *self.closed.write().await = true;
        Ok(())
    }
}

// ============================================================================
// Recorded deliveries
// ============================================================================

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Nacked,
    Rejected,
}

/// Shared log of settlements for deliveries built by [`recorded_delivery`].
pub type SettlementLog = Arc<RwLock<Vec<Settlement>>>;

struct RecordingAcker {
    log: SettlementLog,
}

#[async_trait]
impl Acker for RecordingAcker {
    async fn ack(&self) -> Result<()> {
        self.log.write().await.push(Settlement::Acked);
        Ok(())
    }

    async fn nack(&self) -> Result<()> {
        self.log.write().await.push(Settlement::Nacked);
        Ok(())
    }

    async fn reject(&self) -> Result<()> {
        self.log.write().await.push(Settlement::Rejected);
        Ok(())
    }
}

/// A delivery whose settlement is appended to `log`.
pub fn recorded_delivery(
    routing_key: &str,
    payload: Vec<u8>,
    attempt: u32,
    log: &SettlementLog,
) -> Delivery {
    Delivery::new(
        routing_key,
        payload,
        attempt,
        Box::new(RecordingAcker { log: log.clone() }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::GracePeriodExpired;

    #[tokio::test]
    async fn test_mock_bus_records_publish() {
        let bus = MockMessageBus::new();
        let event: Event = GracePeriodExpired::new(3, chrono::Utc::now()).into();

        crate::bus::publish_event(&bus, &event).await.unwrap();

        assert_eq!(bus.published_count().await, 1);
        assert_eq!(bus.routing_keys().await, vec!["order.grace-period-expired"]);
        assert_eq!(bus.events().await, vec![event]);
    }

    #[tokio::test]
    async fn test_mock_bus_fail_on_publish() {
        let bus = MockMessageBus::new();
        bus.set_fail_on_publish(true).await;

        let result = bus.publish("order.created", Vec::new()).await;

        assert!(matches!(result, Err(BusError::Connection(_))));
        assert_eq!(bus.published_count().await, 0);
    }

    #[tokio::test]
    async fn test_mock_bus_close() {
        let bus = MockMessageBus::new();
        assert!(!bus.is_closed().await);
        bus.close().await.unwrap();
        assert!(bus.is_closed().await);
    }

    #[tokio::test]
    async fn test_mock_bus_subscribe_not_supported() {
        let bus = MockMessageBus::new();
        let result = bus.subscribe("q", "#").await;
        assert!(matches!(result, Err(BusError::Subscribe(_))));
    }

    #[tokio::test]
    async fn test_recorded_delivery_logs_settlement() {
        let log = SettlementLog::default();
        recorded_delivery("k", Vec::new(), 1, &log)
            .nack()
            .await
            .unwrap();
        recorded_delivery("k", Vec::new(), 2, &log).ack().await.unwrap();
        assert_eq!(
            *log.read().await,
            vec![Settlement::Nacked, Settlement::Acked]
        );
    }
}
