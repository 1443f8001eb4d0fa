//! Buyer notifications on order status changes.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::events::OrderStatusChanged;

#[derive(Debug, thiserror::Error)]
#[error("Notification failed: {0}")]
pub struct NotificationError(pub String);

/// Where buyer-facing status updates go.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn order_status_changed(&self, event: &OrderStatusChanged) -> Result<(), NotificationError>;
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn order_status_changed(&self, event: &OrderStatusChanged) -> Result<(), NotificationError> {
        info!(
            buyer_id = %event.buyer_id,
            order_id = event.order_id,
            old_status = %event.old_status,
            new_status = %event.new_status,
            description = %event.description,
            "Buyer notified"
        );
        Ok(())
    }
}

/// Keeps notifications in memory for inspection.
#[derive(Debug, Default)]
pub struct MemoryNotificationSink {
    sent: RwLock<Vec<OrderStatusChanged>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<OrderStatusChanged> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn order_status_changed(&self, event: &OrderStatusChanged) -> Result<(), NotificationError> {
        self.sent.write().await.push(event.clone());
        Ok(())
    }
}
