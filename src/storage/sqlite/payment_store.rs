//! SQLite PaymentRepository.

use async_trait::async_trait;
use sea_query::{Expr, Query, SelectStatement, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{
    format_timestamp, is_unique_violation, parse_decimal, parse_optional_timestamp,
    parse_timestamp,
};
use crate::domain::{FailureCode, OrderId, PaymentRecord, PaymentStatus, PaymentStatusUpdate};
use crate::storage::schema::{Payments, CREATE_PAYMENTS_TABLE};
use crate::storage::{PaymentRepository, Result, StorageError};

/// SQLite implementation of PaymentRepository.
pub struct SqlitePaymentStore {
    pool: SqlitePool,
}

impl SqlitePaymentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the payments table if it does not exist.
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_PAYMENTS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn select() -> SelectStatement {
        Query::select()
            .columns([
                Payments::Id,
                Payments::OrderId,
                Payments::BuyerId,
                Payments::Amount,
                Payments::Currency,
                Payments::Status,
                Payments::TransactionId,
                Payments::FailureReason,
                Payments::FailureCode,
                Payments::EventId,
                Payments::CreatedAt,
                Payments::UpdatedAt,
                Payments::ProcessedAt,
            ])
            .from(Payments::Table)
            .to_owned()
    }

    async fn fetch(&self, query: &SelectStatement) -> Result<Option<PaymentRecord>> {
        sqlx::query(&query.to_string(SqliteQueryBuilder))
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_record)
            .transpose()
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| StorageError::Corrupt(format!("uuid {value:?}: {e}")))
}

fn parse_status(value: &str) -> Result<PaymentStatus> {
    PaymentStatus::parse(value)
        .ok_or_else(|| StorageError::Corrupt(format!("payment status {value:?}")))
}

fn row_to_record(row: &SqliteRow) -> Result<PaymentRecord> {
    let failure_code: Option<String> = row.get("failure_code");
    Ok(PaymentRecord {
        id: parse_uuid(row.get("id"))?,
        order_id: row.get("order_id"),
        buyer_id: row.get("buyer_id"),
        amount: parse_decimal(row.get("amount"))?,
        currency: row.get("currency"),
        status: parse_status(row.get("status"))?,
        transaction_id: row.get("transaction_id"),
        failure_reason: row.get("failure_reason"),
        failure_code: failure_code.as_deref().map(FailureCode::parse),
        event_id: parse_uuid(row.get("event_id"))?,
        created_at: parse_timestamp(row.get("created_at"))?,
        updated_at: parse_timestamp(row.get("updated_at"))?,
        processed_at: parse_optional_timestamp(row.get("processed_at"))?,
    })
}

#[async_trait]
impl PaymentRepository for SqlitePaymentStore {
    async fn create(&self, record: PaymentRecord) -> Result<PaymentRecord> {
        let query = Query::insert()
            .into_table(Payments::Table)
            .columns([
                Payments::Id,
                Payments::OrderId,
                Payments::BuyerId,
                Payments::Amount,
                Payments::Currency,
                Payments::Status,
                Payments::TransactionId,
                Payments::FailureReason,
                Payments::FailureCode,
                Payments::EventId,
                Payments::CreatedAt,
                Payments::UpdatedAt,
                Payments::ProcessedAt,
            ])
            .values_panic([
                record.id.to_string().into(),
                record.order_id.into(),
                record.buyer_id.as_str().into(),
                record.amount.to_string().into(),
                record.currency.as_str().into(),
                record.status.as_str().into(),
                record.transaction_id.clone().into(),
                record.failure_reason.clone().into(),
                record.failure_code.map(|c| c.as_str().to_string()).into(),
                record.event_id.to_string().into(),
                format_timestamp(record.created_at).into(),
                format_timestamp(record.updated_at).into(),
                record.processed_at.map(format_timestamp).into(),
            ])
            .to_string(SqliteQueryBuilder);

        match sqlx::query(&query).execute(&self.pool).await {
            Ok(_) => Ok(record),
            Err(e) if is_unique_violation(&e) => Err(StorageError::Duplicate {
                entity: "payment for order",
                key: record.order_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentRecord>> {
        self.fetch(Self::select().and_where(Expr::col(Payments::Id).eq(id.to_string())))
            .await
    }

    async fn find_by_order_id(&self, order_id: OrderId) -> Result<Option<PaymentRecord>> {
        self.fetch(Self::select().and_where(Expr::col(Payments::OrderId).eq(order_id)))
            .await
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        update: PaymentStatusUpdate,
    ) -> Result<PaymentRecord> {
        let query = Query::update()
            .table(Payments::Table)
            .values([
                (Payments::Status, update.status.as_str().into()),
                (Payments::TransactionId, update.transaction_id.clone().into()),
                (Payments::FailureReason, update.failure_reason.clone().into()),
                (
                    Payments::FailureCode,
                    update.failure_code.map(|c| c.as_str().to_string()).into(),
                ),
                (
                    Payments::ProcessedAt,
                    update.processed_at.map(format_timestamp).into(),
                ),
                (Payments::UpdatedAt, format_timestamp(update.updated_at).into()),
            ])
            .and_where(Expr::col(Payments::Id).eq(id.to_string()))
            .and_where(Expr::col(Payments::Status).eq(expected.as_str()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        let current = self.find_by_id(id).await?.ok_or_else(|| StorageError::NotFound {
            entity: "payment",
            id: id.to_string(),
        })?;

        if result.rows_affected() == 0 {
            return Err(StorageError::StatusConflict {
                payment_id: id,
                expected,
                actual: current.status,
            });
        }
        Ok(current)
    }
}
