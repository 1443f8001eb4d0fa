//! Command boundary of the Order service.
//!
//! Commands are validated synchronously and keyed by the client's request
//! id: a repeated request returns the stored outcome without side effects.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::coordinator::{AdvanceError, Advanced, OrderCoordinator};
use super::saga::Inbound;
use super::state_machine::TransitionError;
use crate::bus::{publish_typed, BusError};
use crate::domain::{
    CommandType, CreateOrder, Order, OrderId, OrderStatus, ProcessedRequest, ValidationError,
};
use crate::events::OrderCreated;
use crate::storage::{IdempotencyRepository, Page, PageRequest, StorageError};

/// Attempts made when a concurrent saga step wins the version race.
const MAX_CONFLICT_RETRIES: usize = 3;

/// Errors returned to command callers.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Order {0} not found")]
    OrderNotFound(OrderId),

    #[error("Order {order_id} does not belong to buyer {buyer_id}")]
    NotOwner { order_id: OrderId, buyer_id: String },

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("Request {request_id} was already used for {command_type:?}")]
    RequestIdReused {
        request_id: Uuid,
        command_type: CommandType,
    },

    #[error("Order {0} kept changing concurrently, try again")]
    Conflict(OrderId),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl From<AdvanceError> for CommandError {
    fn from(error: AdvanceError) -> Self {
        match error {
            AdvanceError::OrderNotFound(id) => CommandError::OrderNotFound(id),
            AdvanceError::Storage(e) => CommandError::Storage(e),
            AdvanceError::Bus(e) => CommandError::Bus(e),
        }
    }
}

/// Result of `create_order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOrderResult {
    pub order_id: OrderId,
    /// The request id was seen before; nothing was created.
    pub duplicate: bool,
}

/// Result of `cancel_order` and `ship_order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub duplicate: bool,
}

pub struct OrderCommandService {
    coordinator: Arc<OrderCoordinator>,
    ledger: Arc<dyn IdempotencyRepository>,
}

impl OrderCommandService {
    pub fn new(coordinator: Arc<OrderCoordinator>, ledger: Arc<dyn IdempotencyRepository>) -> Self {
        Self {
            coordinator,
            ledger,
        }
    }

    /// Create an order, or return the one created for this request id.
    #[tracing::instrument(name = "order.create", skip_all, fields(request_id = %command.request_id))]
    pub async fn create_order(&self, command: CreateOrder) -> Result<CreateOrderResult, CommandError> {
        let now = Utc::now();
        command.validate(now)?;

        if let Some(result) = self.replayed_create(command.request_id).await? {
            return Ok(result);
        }

        let order = match self.coordinator.orders().create(command.to_new_order(now)).await {
            Ok(order) => order,
            // Lost a race with a concurrent retry of the same request.
            Err(e @ StorageError::Duplicate { .. }) => {
                if let Some(result) = self.replayed_create(command.request_id).await? {
                    return Ok(result);
                }
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        info!(order_id = order.id, total = %order.total_price, "Order created");
        publish_typed(
            self.coordinator.bus().as_ref(),
            OrderCreated::for_order(&order, now),
        )
        .await?;

        Ok(CreateOrderResult {
            order_id: order.id,
            duplicate: false,
        })
    }

    async fn replayed_create(&self, request_id: Uuid) -> Result<Option<CreateOrderResult>, CommandError> {
        let Some(entry) = self.ledger.find_by_request_id(request_id).await? else {
            return Ok(None);
        };
        let order_id = expect_command(&entry, CommandType::CreateOrder)?;
        info!(order_id, "Duplicate create request, returning stored result");
        Ok(Some(CreateOrderResult {
            order_id,
            duplicate: true,
        }))
    }

    /// Buyer cancellation. Allowed until payment succeeds.
    #[tracing::instrument(name = "order.cancel", skip_all, fields(request_id = %request_id, order_id = order_id))]
    pub async fn cancel_order(
        &self,
        request_id: Uuid,
        order_id: OrderId,
        buyer_id: &str,
    ) -> Result<CommandOutcome, CommandError> {
        if let Some(outcome) = self.replayed(request_id, CommandType::CancelOrder).await? {
            return Ok(outcome);
        }

        let order = self.load(order_id).await?;
        if order.buyer_id != buyer_id {
            return Err(CommandError::NotOwner {
                order_id,
                buyer_id: buyer_id.to_string(),
            });
        }

        let inbound = Inbound::CancelRequested {
            reason: "Cancelled by buyer".to_string(),
        };
        let order = self.advance(order_id, inbound).await?;
        self.record(request_id, CommandType::CancelOrder, &order).await
    }

    /// Operator confirmation that a paid order left the kitchen.
    #[tracing::instrument(name = "order.ship", skip_all, fields(request_id = %request_id, order_id = order_id))]
    pub async fn ship_order(&self, request_id: Uuid, order_id: OrderId) -> Result<CommandOutcome, CommandError> {
        if let Some(outcome) = self.replayed(request_id, CommandType::ShipOrder).await? {
            return Ok(outcome);
        }

        let order = self.advance(order_id, Inbound::ShipRequested).await?;
        self.record(request_id, CommandType::ShipOrder, &order).await
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order, CommandError> {
        self.load(order_id).await
    }

    pub async fn list_orders_for_buyer(
        &self,
        buyer_id: &str,
        page: PageRequest,
    ) -> Result<Page<Order>, CommandError> {
        Ok(self.coordinator.orders().find_by_buyer_id(buyer_id, page).await?)
    }

    pub async fn list_orders(&self, page: PageRequest) -> Result<Page<Order>, CommandError> {
        Ok(self.coordinator.orders().find_all(page).await?)
    }

    async fn load(&self, order_id: OrderId) -> Result<Order, CommandError> {
        self.coordinator
            .orders()
            .find_by_id(order_id)
            .await?
            .ok_or(CommandError::OrderNotFound(order_id))
    }

    /// Advance, retrying lost version races a bounded number of times.
    async fn advance(&self, order_id: OrderId, inbound: Inbound) -> Result<Order, CommandError> {
        for _ in 0..MAX_CONFLICT_RETRIES {
            match self.coordinator.advance(order_id, inbound.clone()).await {
                Ok(Advanced::Applied(order)) | Ok(Advanced::AlreadyApplied(order)) => {
                    return Ok(order)
                }
                Ok(Advanced::Refused(_, e)) => return Err(e.into()),
                Err(AdvanceError::Storage(e)) if e.is_conflict() => {
                    warn!(order_id, "Order changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CommandError::Conflict(order_id))
    }

    async fn replayed(
        &self,
        request_id: Uuid,
        command_type: CommandType,
    ) -> Result<Option<CommandOutcome>, CommandError> {
        let Some(entry) = self.ledger.find_by_request_id(request_id).await? else {
            return Ok(None);
        };
        let order_id = expect_command(&entry, command_type)?;
        let status = entry
            .result
            .as_ref()
            .and_then(|r| r.get("status"))
            .and_then(|s| s.as_str())
            .and_then(OrderStatus::parse)
            .ok_or_else(|| StorageError::Corrupt(format!("ledger entry {request_id} has no status")))?;

        Ok(Some(CommandOutcome {
            order_id,
            status,
            duplicate: true,
        }))
    }

    async fn record(
        &self,
        request_id: Uuid,
        command_type: CommandType,
        order: &Order,
    ) -> Result<CommandOutcome, CommandError> {
        let entry = ProcessedRequest {
            request_id,
            command_type,
            result: Some(json!({ "orderId": order.id, "status": order.status.as_str() })),
            created_at: Utc::now(),
        };
        match self.ledger.save(entry).await {
            Ok(()) | Err(StorageError::Duplicate { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(CommandOutcome {
            order_id: order.id,
            status: order.status,
            duplicate: false,
        })
    }
}

/// Order id of a ledger entry, provided it was recorded for `expected`.
fn expect_command(entry: &ProcessedRequest, expected: CommandType) -> Result<OrderId, CommandError> {
    if entry.command_type != expected {
        return Err(CommandError::RequestIdReused {
            request_id: entry.request_id,
            command_type: entry.command_type,
        });
    }
    entry.order_id().ok_or_else(|| {
        StorageError::Corrupt(format!("ledger entry {} has no order id", entry.request_id)).into()
    })
}

#[cfg(test)]
mod tests;
