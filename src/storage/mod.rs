//! Persistence for the three services.
//!
//! Each service owns its stores; nothing here is shared across service
//! boundaries at runtime.
//!
//! - Order service: [`OrderRepository`] and [`IdempotencyRepository`]
//! - Menu service: [`StockStore`]
//! - Payment service: [`PaymentRepository`]
//!
//! Implementations: in-memory (default) and SQLite (`sqlite` feature).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::config::{StorageConfig, StorageType};
use crate::domain::{
    MenuItemId, NewOrder, Order, OrderId, PaymentRecord, PaymentStatus, PaymentStatusUpdate,
    ProcessedRequest, RejectedItem, StockValidationItem,
};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{InMemoryOrderStore, InMemoryPaymentStore, InMemoryStockStore};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteOrderStore, SqlitePaymentStore, SqliteStockStore};

// ============================================================================
// Errors
// ============================================================================

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Order {order_id} version conflict: expected {expected}, found {actual}")]
    VersionConflict {
        order_id: OrderId,
        expected: u64,
        actual: u64,
    },

    #[error("Payment {payment_id} status conflict: expected {expected}, found {actual}")]
    StatusConflict {
        payment_id: Uuid,
        expected: PaymentStatus,
        actual: PaymentStatus,
    },

    #[error("Duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StorageError {
    /// Lost an optimistic-concurrency race; retrying will observe the winner.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::VersionConflict { .. } | StorageError::StatusConflict { .. }
        )
    }
}

// ============================================================================
// Pagination
// ============================================================================

/// A 0-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    /// `size` is clamped to at least 1.
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page,
            size: size.max(1),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, 20)
    }
}

/// One page of results, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.size))
    }
}

// ============================================================================
// Order service
// ============================================================================

/// Orders, their items and status history.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>>;

    async fn find_by_request_id(&self, request_id: Uuid) -> Result<Option<Order>>;

    /// Insert the order and its ledger entry in one transaction.
    ///
    /// Fails with `Duplicate` if the request id was already recorded.
    async fn create(&self, order: NewOrder) -> Result<Order>;

    /// Persist status, description and new history entries.
    ///
    /// Conditional on `order.version` matching the stored version; a
    /// mismatch fails with `VersionConflict`. Returns the order with its
    /// version bumped.
    async fn update(&self, order: &Order) -> Result<Order>;

    async fn find_by_buyer_id(&self, buyer_id: &str, page: PageRequest) -> Result<Page<Order>>;

    async fn find_all(&self, page: PageRequest) -> Result<Page<Order>>;

    /// `Submitted` orders created at or before `cutoff`, oldest first.
    async fn find_submitted_before(&self, cutoff: DateTime<Utc>, limit: u32)
        -> Result<Vec<Order>>;
}

/// Processed command ledger keyed by client request id.
#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    async fn find_by_request_id(&self, request_id: Uuid) -> Result<Option<ProcessedRequest>>;

    /// Fails with `Duplicate` if the request id was already recorded.
    async fn save(&self, entry: ProcessedRequest) -> Result<()>;
}

// ============================================================================
// Payment service
// ============================================================================

/// Payment records, at most one per order.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Fails with `Duplicate` if the order already has a record.
    async fn create(&self, record: PaymentRecord) -> Result<PaymentRecord>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentRecord>>;

    async fn find_by_order_id(&self, order_id: OrderId) -> Result<Option<PaymentRecord>>;

    /// Apply `update` if the record is still in `expected` status.
    async fn update_status(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        update: PaymentStatusUpdate,
    ) -> Result<PaymentRecord>;
}

// ============================================================================
// Menu service
// ============================================================================

/// What the Menu service decided for an order's items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockDecision {
    /// Every item was held.
    Reserved,
    /// Nothing was held; lists the insufficient items.
    Rejected(Vec<RejectedItem>),
    /// Released before a reservation was ever attempted.
    Voided,
}

/// Per-order reservation ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub order_id: OrderId,
    pub items: Vec<StockValidationItem>,
    pub decision: StockDecision,
    pub decided_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    /// True when this call found an earlier decision instead of making one.
    pub replayed: bool,
}

/// Stock levels and per-order reservations.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Reserve every item or none, recording the decision for `order_id`.
    ///
    /// A second call for the same order returns the recorded decision with
    /// `replayed` set and changes nothing.
    async fn reserve(
        &self,
        order_id: OrderId,
        items: &[StockValidationItem],
        at: DateTime<Utc>,
    ) -> Result<Reservation>;

    /// Return held quantities. Returns what was released, empty if nothing
    /// was held. Releasing an order never reserved voids it.
    async fn release(&self, order_id: OrderId, at: DateTime<Utc>)
        -> Result<Vec<StockValidationItem>>;

    /// Units available; unknown items have none.
    async fn available(&self, menu_item_id: MenuItemId) -> Result<u32>;

    async fn set_available(&self, menu_item_id: MenuItemId, quantity: u32) -> Result<()>;
}

// ============================================================================
// Wiring
// ============================================================================

/// Order service stores.
#[derive(Clone)]
pub struct OrderStores {
    pub orders: Arc<dyn OrderRepository>,
    pub ledger: Arc<dyn IdempotencyRepository>,
}

/// Build the Order service's stores from configuration.
pub async fn order_stores(config: &StorageConfig) -> std::result::Result<OrderStores, Box<dyn std::error::Error>> {
    info!(storage = ?config.storage_type, "Order storage");
    match config.storage_type {
        StorageType::Memory => {
            let store = Arc::new(InMemoryOrderStore::new());
            Ok(OrderStores {
                orders: store.clone(),
                ledger: store,
            })
        }
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            let store = Arc::new(SqliteOrderStore::new(sqlite::connect(&config.sqlite.path).await?));
            store.init().await?;
            Ok(OrderStores {
                orders: store.clone(),
                ledger: store,
            })
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => Err("SQLite storage requested but 'sqlite' feature is not enabled".into()),
    }
}

/// Build the Menu service's stock store from configuration.
pub async fn stock_store(config: &StorageConfig) -> std::result::Result<Arc<dyn StockStore>, Box<dyn std::error::Error>> {
    info!(storage = ?config.storage_type, "Stock storage");
    match config.storage_type {
        StorageType::Memory => Ok(Arc::new(InMemoryStockStore::new())),
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            let store = SqliteStockStore::new(sqlite::connect(&config.sqlite.path).await?);
            store.init().await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => Err("SQLite storage requested but 'sqlite' feature is not enabled".into()),
    }
}

/// Build the Payment service's store from configuration.
pub async fn payment_store(config: &StorageConfig) -> std::result::Result<Arc<dyn PaymentRepository>, Box<dyn std::error::Error>> {
    info!(storage = ?config.storage_type, "Payment storage");
    match config.storage_type {
        StorageType::Memory => Ok(Arc::new(InMemoryPaymentStore::new())),
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            let store = SqlitePaymentStore::new(sqlite::connect(&config.sqlite.path).await?);
            store.init().await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => Err("SQLite storage requested but 'sqlite' feature is not enabled".into()),
    }
}
