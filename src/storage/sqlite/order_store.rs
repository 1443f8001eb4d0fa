//! SQLite OrderRepository and IdempotencyRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, Order as SortOrder, Query, SelectStatement, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::{
    format_timestamp, from_json, is_unique_violation, parse_decimal, parse_timestamp, to_json,
};
use crate::domain::{
    CommandType, NewOrder, Order, OrderHistoryEntry, OrderId, OrderItem, OrderStatus,
    ProcessedRequest,
};
use crate::storage::schema::{
    OrderHistory, OrderItems, Orders, ProcessedRequests, CREATE_ORDER_TABLES,
};
use crate::storage::{
    IdempotencyRepository, OrderRepository, Page, PageRequest, Result, StorageError,
};

const ORDER_COLUMNS: [Orders; 10] = [
    Orders::Id,
    Orders::RequestId,
    Orders::BuyerId,
    Orders::Status,
    Orders::TotalPrice,
    Orders::PaymentMethod,
    Orders::Description,
    Orders::CreatedAt,
    Orders::UpdatedAt,
    Orders::Version,
];

/// SQLite implementation of the Order service's stores.
pub struct SqliteOrderStore {
    pool: SqlitePool,
}

impl SqliteOrderStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist.
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_ORDER_TABLES).execute(&self.pool).await?;
        Ok(())
    }

    async fn ledger_contains(conn: &mut SqliteConnection, request_id: Uuid) -> Result<bool> {
        let query = Query::select()
            .column(ProcessedRequests::RequestId)
            .from(ProcessedRequests::Table)
            .and_where(Expr::col(ProcessedRequests::RequestId).eq(request_id.to_string()))
            .to_string(SqliteQueryBuilder);
        Ok(sqlx::query(&query)
            .fetch_optional(&mut *conn)
            .await?
            .is_some())
    }

    async fn insert_ledger_entry(
        conn: &mut SqliteConnection,
        entry: &ProcessedRequest,
    ) -> Result<()> {
        let result = entry.result.as_ref().map(to_json).transpose()?;
        let query = Query::insert()
            .into_table(ProcessedRequests::Table)
            .columns([
                ProcessedRequests::RequestId,
                ProcessedRequests::CommandType,
                ProcessedRequests::Result,
                ProcessedRequests::CreatedAt,
            ])
            .values_panic([
                entry.request_id.to_string().into(),
                entry.command_type.as_str().into(),
                result.into(),
                format_timestamp(entry.created_at).into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::Duplicate {
                        entity: "request",
                        key: entry.request_id.to_string(),
                    }
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    /// Insert order, items and ledger entry within an already-started
    /// transaction. Returns the assigned id.
    async fn insert_order(conn: &mut SqliteConnection, order: &NewOrder) -> Result<OrderId> {
        if Self::ledger_contains(conn, order.request_id).await? {
            return Err(StorageError::Duplicate {
                entity: "request",
                key: order.request_id.to_string(),
            });
        }

        let payment_method = order.payment_method.as_ref().map(to_json).transpose()?;
        let created_at = format_timestamp(order.created_at);
        let query = Query::insert()
            .into_table(Orders::Table)
            .columns([
                Orders::RequestId,
                Orders::BuyerId,
                Orders::Status,
                Orders::TotalPrice,
                Orders::PaymentMethod,
                Orders::Description,
                Orders::CreatedAt,
                Orders::UpdatedAt,
                Orders::Version,
            ])
            .values_panic([
                order.request_id.to_string().into(),
                order.buyer_id.as_str().into(),
                OrderStatus::Submitted.as_str().into(),
                order.total_price.to_string().into(),
                payment_method.into(),
                "".into(),
                created_at.clone().into(),
                created_at.into(),
                0i64.into(),
            ])
            .to_string(SqliteQueryBuilder);
        let id = sqlx::query(&query)
            .execute(&mut *conn)
            .await?
            .last_insert_rowid();

        for (position, item) in order.items.iter().enumerate() {
            let query = Query::insert()
                .into_table(OrderItems::Table)
                .columns([
                    OrderItems::OrderId,
                    OrderItems::Position,
                    OrderItems::MenuItemId,
                    OrderItems::MenuItemName,
                    OrderItems::PictureUrl,
                    OrderItems::UnitPrice,
                    OrderItems::Quantity,
                    OrderItems::Discount,
                ])
                .values_panic([
                    id.into(),
                    (position as i64).into(),
                    item.menu_item_id.into(),
                    item.menu_item_name.as_str().into(),
                    item.picture_url.clone().into(),
                    item.unit_price.to_string().into(),
                    i64::from(item.quantity).into(),
                    item.discount.to_string().into(),
                ])
                .to_string(SqliteQueryBuilder);
            sqlx::query(&query).execute(&mut *conn).await?;
        }

        let entry = ProcessedRequest::order_created(order.request_id, id, order.created_at);
        Self::insert_ledger_entry(conn, &entry).await?;
        Ok(id)
    }

    /// Check the version, append new history and bump the version within an
    /// already-started transaction.
    async fn apply_update(conn: &mut SqliteConnection, order: &Order) -> Result<()> {
        let query = Query::select()
            .column(Orders::Version)
            .from(Orders::Table)
            .and_where(Expr::col(Orders::Id).eq(order.id))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "order",
                id: order.id.to_string(),
            })?;
        let actual: i64 = row.get(0);
        if actual as u64 != order.version {
            return Err(StorageError::VersionConflict {
                order_id: order.id,
                expected: order.version,
                actual: actual as u64,
            });
        }

        let query = Query::select()
            .expr(Expr::col(OrderHistory::Seq).count())
            .from(OrderHistory::Table)
            .and_where(Expr::col(OrderHistory::OrderId).eq(order.id))
            .to_string(SqliteQueryBuilder);
        let known: i64 = sqlx::query(&query).fetch_one(&mut *conn).await?.get(0);

        for (seq, entry) in order.history.iter().enumerate().skip(known as usize) {
            let query = Query::insert()
                .into_table(OrderHistory::Table)
                .columns([
                    OrderHistory::OrderId,
                    OrderHistory::Seq,
                    OrderHistory::Status,
                    OrderHistory::Description,
                    OrderHistory::CreatedAt,
                ])
                .values_panic([
                    order.id.into(),
                    (seq as i64).into(),
                    entry.status.as_str().into(),
                    entry.description.as_str().into(),
                    format_timestamp(entry.created_at).into(),
                ])
                .to_string(SqliteQueryBuilder);
            sqlx::query(&query).execute(&mut *conn).await?;
        }

        let query = Query::update()
            .table(Orders::Table)
            .values([
                (Orders::Status, order.status.as_str().into()),
                (Orders::Description, order.description.as_str().into()),
                (Orders::UpdatedAt, format_timestamp(order.updated_at).into()),
                (Orders::Version, Expr::col(Orders::Version).add(1)),
            ])
            .and_where(Expr::col(Orders::Id).eq(order.id))
            .and_where(Expr::col(Orders::Version).eq(actual))
            .to_string(SqliteQueryBuilder);
        let updated = sqlx::query(&query).execute(&mut *conn).await?;
        if updated.rows_affected() != 1 {
            return Err(StorageError::VersionConflict {
                order_id: order.id,
                expected: order.version,
                actual: actual as u64,
            });
        }
        Ok(())
    }

    fn select_orders() -> SelectStatement {
        Query::select()
            .columns(ORDER_COLUMNS)
            .from(Orders::Table)
            .to_owned()
    }

    async fn fetch_orders(&self, query: &SelectStatement) -> Result<Vec<Order>> {
        let rows = sqlx::query(&query.to_string(SqliteQueryBuilder))
            .fetch_all(&self.pool)
            .await?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            orders.push(self.hydrate(row).await?);
        }
        Ok(orders)
    }

    async fn fetch_one(&self, query: &SelectStatement) -> Result<Option<Order>> {
        Ok(self.fetch_orders(query).await?.into_iter().next())
    }

    async fn count(&self, query: SelectStatement) -> Result<u64> {
        let total: i64 = sqlx::query(&query.to_string(SqliteQueryBuilder))
            .fetch_one(&self.pool)
            .await?
            .get(0);
        Ok(total as u64)
    }

    /// Build an order from its row plus its items and history.
    async fn hydrate(&self, row: &SqliteRow) -> Result<Order> {
        let id: OrderId = row.get("id");

        let query = Query::select()
            .columns([
                OrderItems::MenuItemId,
                OrderItems::MenuItemName,
                OrderItems::PictureUrl,
                OrderItems::UnitPrice,
                OrderItems::Quantity,
                OrderItems::Discount,
            ])
            .from(OrderItems::Table)
            .and_where(Expr::col(OrderItems::OrderId).eq(id))
            .order_by(OrderItems::Position, SortOrder::Asc)
            .to_string(SqliteQueryBuilder);
        let items = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|r| {
                Ok(OrderItem {
                    menu_item_id: r.get("menu_item_id"),
                    menu_item_name: r.get("menu_item_name"),
                    picture_url: r.get("picture_url"),
                    unit_price: parse_decimal(r.get("unit_price"))?,
                    quantity: u32::try_from(r.get::<i64, _>("quantity"))
                        .map_err(|e| StorageError::Corrupt(e.to_string()))?,
                    discount: parse_decimal(r.get("discount"))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let query = Query::select()
            .columns([
                OrderHistory::Status,
                OrderHistory::Description,
                OrderHistory::CreatedAt,
            ])
            .from(OrderHistory::Table)
            .and_where(Expr::col(OrderHistory::OrderId).eq(id))
            .order_by(OrderHistory::Seq, SortOrder::Asc)
            .to_string(SqliteQueryBuilder);
        let history = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|r| {
                Ok(OrderHistoryEntry {
                    order_id: id,
                    status: parse_status(r.get("status"))?,
                    description: r.get("description"),
                    created_at: parse_timestamp(r.get("created_at"))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let request_id: String = row.get("request_id");
        let payment_method: Option<String> = row.get("payment_method");
        Ok(Order {
            id,
            request_id: Uuid::parse_str(&request_id)
                .map_err(|e| StorageError::Corrupt(format!("request id {request_id:?}: {e}")))?,
            buyer_id: row.get("buyer_id"),
            status: parse_status(row.get("status"))?,
            items,
            total_price: parse_decimal(row.get("total_price"))?,
            payment_method: payment_method.as_deref().map(from_json).transpose()?,
            description: row.get("description"),
            history,
            created_at: parse_timestamp(row.get("created_at"))?,
            updated_at: parse_timestamp(row.get("updated_at"))?,
            version: row.get::<i64, _>("version") as u64,
        })
    }

    async fn page(&self, buyer_id: Option<&str>, page: PageRequest) -> Result<Page<Order>> {
        let mut count = Query::select()
            .expr(Expr::col(Orders::Id).count())
            .from(Orders::Table)
            .to_owned();
        let mut select = Self::select_orders();
        if let Some(buyer_id) = buyer_id {
            count.and_where(Expr::col(Orders::BuyerId).eq(buyer_id));
            select.and_where(Expr::col(Orders::BuyerId).eq(buyer_id));
        }
        select
            .order_by(Orders::Id, SortOrder::Desc)
            .limit(u64::from(page.size))
            .offset(page.offset());

        Ok(Page {
            total: self.count(count).await?,
            items: self.fetch_orders(&select).await?,
            page: page.page,
            size: page.size,
        })
    }
}

fn parse_status(value: &str) -> Result<OrderStatus> {
    OrderStatus::parse(value).ok_or_else(|| StorageError::Corrupt(format!("order status {value:?}")))
}

#[async_trait]
impl OrderRepository for SqliteOrderStore {
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        self.fetch_one(Self::select_orders().and_where(Expr::col(Orders::Id).eq(id)))
            .await
    }

    async fn find_by_request_id(&self, request_id: Uuid) -> Result<Option<Order>> {
        self.fetch_one(
            Self::select_orders()
                .and_where(Expr::col(Orders::RequestId).eq(request_id.to_string())),
        )
        .await
    }

    async fn create(&self, order: NewOrder) -> Result<Order> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        match Self::insert_order(&mut conn, &order).await {
            Ok(id) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                debug!(order_id = id, request_id = %order.request_id, "Order inserted");
                Ok(order.into_order(id))
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn update(&self, order: &Order) -> Result<Order> {
        {
            let mut conn = self.pool.acquire().await?;
            sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

            match Self::apply_update(&mut conn, order).await {
                Ok(()) => {
                    sqlx::query("COMMIT").execute(&mut *conn).await?;
                }
                Err(e) => {
                    let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                    return Err(e);
                }
            }
        }

        self.find_by_id(order.id)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "order",
                id: order.id.to_string(),
            })
    }

    async fn find_by_buyer_id(&self, buyer_id: &str, page: PageRequest) -> Result<Page<Order>> {
        self.page(Some(buyer_id), page).await
    }

    async fn find_all(&self, page: PageRequest) -> Result<Page<Order>> {
        self.page(None, page).await
    }

    async fn find_submitted_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Order>> {
        let query = Self::select_orders()
            .and_where(Expr::col(Orders::Status).eq(OrderStatus::Submitted.as_str()))
            .and_where(Expr::col(Orders::CreatedAt).lte(format_timestamp(cutoff)))
            .order_by(Orders::CreatedAt, SortOrder::Asc)
            .order_by(Orders::Id, SortOrder::Asc)
            .limit(u64::from(limit))
            .to_owned();
        self.fetch_orders(&query).await
    }
}

#[async_trait]
impl IdempotencyRepository for SqliteOrderStore {
    async fn find_by_request_id(&self, request_id: Uuid) -> Result<Option<ProcessedRequest>> {
        let query = Query::select()
            .columns([
                ProcessedRequests::CommandType,
                ProcessedRequests::Result,
                ProcessedRequests::CreatedAt,
            ])
            .from(ProcessedRequests::Table)
            .and_where(Expr::col(ProcessedRequests::RequestId).eq(request_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let Some(row) = sqlx::query(&query).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };

        let command_type: String = row.get("command_type");
        let result: Option<String> = row.get("result");
        Ok(Some(ProcessedRequest {
            request_id,
            command_type: CommandType::parse(&command_type).ok_or_else(|| {
                StorageError::Corrupt(format!("command type {command_type:?}"))
            })?,
            result: result.as_deref().map(from_json).transpose()?,
            created_at: parse_timestamp(row.get("created_at"))?,
        }))
    }

    async fn save(&self, entry: ProcessedRequest) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_ledger_entry(&mut conn, &entry).await
    }
}
