//! SQLite StockStore.
//!
//! Reserve and release run in `BEGIN IMMEDIATE` transactions, so the level
//! checks and the decrements see one consistent snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use super::{format_timestamp, from_json, parse_optional_timestamp, parse_timestamp, to_json};
use crate::domain::{aggregate_items, MenuItemId, OrderId, RejectedItem, StockValidationItem};
use crate::storage::schema::{MenuStock, StockReservations, CREATE_STOCK_TABLES};
use crate::storage::{Reservation, Result, StockDecision, StockStore, StorageError};

const RESERVED: &str = "RESERVED";
const REJECTED: &str = "REJECTED";
const VOIDED: &str = "VOIDED";

/// SQLite implementation of StockStore.
pub struct SqliteStockStore {
    pool: SqlitePool,
}

impl SqliteStockStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create stock tables if they do not exist.
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_STOCK_TABLES).execute(&self.pool).await?;
        Ok(())
    }

    async fn level(conn: &mut SqliteConnection, menu_item_id: MenuItemId) -> Result<u32> {
        let query = Query::select()
            .column(MenuStock::Available)
            .from(MenuStock::Table)
            .and_where(Expr::col(MenuStock::MenuItemId).eq(menu_item_id))
            .to_string(SqliteQueryBuilder);
        let available: Option<i64> = sqlx::query(&query)
            .fetch_optional(&mut *conn)
            .await?
            .map(|row| row.get(0));
        Ok(available.map_or(0, |n| n.clamp(0, i64::from(u32::MAX)) as u32))
    }

    async fn find_reservation(
        conn: &mut SqliteConnection,
        order_id: OrderId,
    ) -> Result<Option<Reservation>> {
        let query = Query::select()
            .columns([
                StockReservations::Items,
                StockReservations::Decision,
                StockReservations::RejectedItems,
                StockReservations::DecidedAt,
                StockReservations::ReleasedAt,
            ])
            .from(StockReservations::Table)
            .and_where(Expr::col(StockReservations::OrderId).eq(order_id))
            .to_string(SqliteQueryBuilder);

        let Some(row) = sqlx::query(&query).fetch_optional(&mut *conn).await? else {
            return Ok(None);
        };

        let decision: String = row.get("decision");
        let rejected: Option<String> = row.get("rejected_items");
        let decision = match decision.as_str() {
            RESERVED => StockDecision::Reserved,
            REJECTED => StockDecision::Rejected(
                rejected.as_deref().map(from_json).transpose()?.unwrap_or_default(),
            ),
            VOIDED => StockDecision::Voided,
            other => return Err(StorageError::Corrupt(format!("stock decision {other:?}"))),
        };

        Ok(Some(Reservation {
            order_id,
            items: from_json(row.get("items"))?,
            decision,
            decided_at: parse_timestamp(row.get("decided_at"))?,
            released_at: parse_optional_timestamp(row.get("released_at"))?,
            replayed: false,
        }))
    }

    async fn insert_reservation(conn: &mut SqliteConnection, reservation: &Reservation) -> Result<()> {
        let (decision, rejected) = match &reservation.decision {
            StockDecision::Reserved => (RESERVED, None),
            StockDecision::Rejected(items) => (REJECTED, Some(to_json(items)?)),
            StockDecision::Voided => (VOIDED, None),
        };
        let query = Query::insert()
            .into_table(StockReservations::Table)
            .columns([
                StockReservations::OrderId,
                StockReservations::Items,
                StockReservations::Decision,
                StockReservations::RejectedItems,
                StockReservations::DecidedAt,
                StockReservations::ReleasedAt,
            ])
            .values_panic([
                reservation.order_id.into(),
                to_json(&reservation.items)?.into(),
                decision.into(),
                rejected.into(),
                format_timestamp(reservation.decided_at).into(),
                reservation.released_at.map(format_timestamp).into(),
            ])
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(())
    }

    async fn adjust(conn: &mut SqliteConnection, menu_item_id: MenuItemId, delta: i64) -> Result<()> {
        let query = Query::insert()
            .into_table(MenuStock::Table)
            .columns([MenuStock::MenuItemId, MenuStock::Available])
            .values_panic([menu_item_id.into(), delta.max(0).into()])
            .on_conflict(
                OnConflict::column(MenuStock::MenuItemId)
                    .value(
                        MenuStock::Available,
                        Expr::col((MenuStock::Table, MenuStock::Available)).add(delta),
                    )
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(())
    }

    async fn try_reserve(
        conn: &mut SqliteConnection,
        order_id: OrderId,
        items: &[StockValidationItem],
        at: DateTime<Utc>,
    ) -> Result<Reservation> {
        if let Some(existing) = Self::find_reservation(conn, order_id).await? {
            return Ok(Reservation {
                replayed: true,
                ..existing
            });
        }

        let items = aggregate_items(items);
        let mut rejected = Vec::new();
        for item in &items {
            let available = Self::level(conn, item.menu_item_id).await?;
            if available < item.requested_quantity {
                rejected.push(RejectedItem {
                    menu_item_id: item.menu_item_id,
                    requested_quantity: item.requested_quantity,
                    available_quantity: available,
                });
            }
        }

        let decision = if rejected.is_empty() {
            for item in &items {
                Self::adjust(conn, item.menu_item_id, -i64::from(item.requested_quantity)).await?;
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
        Self::insert_reservation(conn, &reservation).await?;
        Ok(reservation)
    }

    async fn try_release(
        conn: &mut SqliteConnection,
        order_id: OrderId,
        at: DateTime<Utc>,
    ) -> Result<Vec<StockValidationItem>> {
        let Some(reservation) = Self::find_reservation(conn, order_id).await? else {
            Self::insert_reservation(
                conn,
                &Reservation {
                    order_id,
                    items: Vec::new(),
                    decision: StockDecision::Voided,
                    decided_at: at,
                    released_at: Some(at),
                    replayed: false,
                },
            )
            .await?;
            return Ok(Vec::new());
        };

        if reservation.decision != StockDecision::Reserved || reservation.released_at.is_some() {
            return Ok(Vec::new());
        }

        for item in &reservation.items {
            Self::adjust(conn, item.menu_item_id, i64::from(item.requested_quantity)).await?;
        }

        let query = Query::update()
            .table(StockReservations::Table)
            .values([(StockReservations::ReleasedAt, format_timestamp(at).into())])
            .and_where(Expr::col(StockReservations::OrderId).eq(order_id))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&mut *conn).await?;

        Ok(reservation.items)
    }
}

#[async_trait]
impl StockStore for SqliteStockStore {
    async fn reserve(
        &self,
        order_id: OrderId,
        items: &[StockValidationItem],
        at: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        match Self::try_reserve(&mut conn, order_id, items, at).await {
            Ok(reservation) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                debug!(order_id, decision = ?reservation.decision, replayed = reservation.replayed, "Reservation decided");
                Ok(reservation)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn release(
        &self,
        order_id: OrderId,
        at: DateTime<Utc>,
    ) -> Result<Vec<StockValidationItem>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        match Self::try_release(&mut conn, order_id, at).await {
            Ok(released) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(released)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn available(&self, menu_item_id: MenuItemId) -> Result<u32> {
        let mut conn = self.pool.acquire().await?;
        Self::level(&mut conn, menu_item_id).await
    }

    async fn set_available(&self, menu_item_id: MenuItemId, quantity: u32) -> Result<()> {
        let query = Query::insert()
            .into_table(MenuStock::Table)
            .columns([MenuStock::MenuItemId, MenuStock::Available])
            .values_panic([menu_item_id.into(), i64::from(quantity).into()])
            .on_conflict(
                OnConflict::column(MenuStock::MenuItemId)
                    .update_column(MenuStock::Available)
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}
