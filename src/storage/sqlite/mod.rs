//! SQLite implementations of storage interfaces.
//!
//! Timestamps are stored as RFC 3339 text with nanosecond precision and a
//! `Z` suffix, so lexical order matches chronological order. Money is
//! stored as decimal text.

mod order_store;
mod payment_store;
mod stock_store;

pub use order_store::SqliteOrderStore;
pub use payment_store::SqlitePaymentStore;
pub use stock_store::SqliteStockStore;

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::storage::{Result, StorageError};

/// Open (creating if missing) the database at `path`.
///
/// `:memory:` gives a private in-memory database; the pool is limited to a
/// single connection in that case so every query sees the same data.
pub async fn connect(path: &str) -> Result<SqlitePool> {
    let in_memory = path == ":memory:";
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .connect_with(options)
        .await?;

    info!(path = %path, "Connected to SQLite");
    Ok(pool)
}

pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("timestamp {value:?}: {e}")))
}

pub(crate) fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn parse_decimal(value: &str) -> Result<Decimal> {
    Decimal::from_str(value).map_err(|e| StorageError::Corrupt(format!("decimal {value:?}: {e}")))
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| StorageError::Corrupt(e.to_string()))
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    serde_json::from_str(value).map_err(|e| StorageError::Corrupt(e.to_string()))
}

/// True for UNIQUE / PRIMARY KEY violations.
pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
