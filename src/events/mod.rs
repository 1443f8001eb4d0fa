//! Integration events exchanged over the broker.
//!
//! Every event is a camelCase JSON object carrying an `eventId` and an
//! `occurredAt` instant. Money travels as decimal strings.
//!
//! [`Event`] is the tagged union of every type on the wire. Consumers decode
//! through it and match exhaustively, so a new event type forces a decision
//! at each dispatch site.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod order;
mod payment;
mod stock;

pub use order::{
    GracePeriodExpired, OrderAwaitingValidation, OrderCancelled, OrderCreated,
    OrderStatusChanged, OrderStockConfirmed, StockReturned,
};
pub use payment::{OrderPaymentFailed, OrderPaymentSucceeded};
pub use stock::{StockConfirmed, StockRejected};

// ============================================================================
// Routing keys
// ============================================================================

pub mod routing {
    pub const ORDER_CREATED: &str = "order.created";
    pub const ORDER_CANCELLED: &str = "order.cancelled";
    pub const ORDER_STATUS_CHANGED: &str = "order.status-changed";
    pub const ORDER_AWAITING_VALIDATION: &str = "order.awaiting-validation";
    pub const ORDER_STOCK_RETURNED: &str = "order.stock-returned";
    pub const ORDER_STOCK_CONFIRMED: &str = "order.stock-confirmed";
    pub const ORDER_GRACE_PERIOD_EXPIRED: &str = "order.grace-period-expired";
    pub const STOCK_CONFIRMED: &str = "stock.confirmed";
    pub const STOCK_REJECTED: &str = "stock.rejected";
    pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";
    pub const PAYMENT_FAILED: &str = "payment.failed";
}

// ============================================================================
// Envelope
// ============================================================================

/// Identity and timestamp shared by every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(occurred_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at,
        }
    }
}

/// A typed event with a fixed routing key.
pub trait IntegrationEvent:
    Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static
{
    const ROUTING_KEY: &'static str;

    fn meta(&self) -> &EventMeta;

    fn event_id(&self) -> Uuid {
        self.meta().event_id
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Errors from encoding or decoding wire payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Malformed '{routing_key}' payload: {source}")]
    Decode {
        routing_key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("No event type is routed by '{0}'")]
    UnknownRoutingKey(String),
}

/// Serialize a typed event to JSON bytes.
pub fn encode<E: Serialize>(event: &E) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(event).map_err(CodecError::Encode)
}

/// Deserialize a typed event from JSON bytes.
pub fn decode<E: IntegrationEvent>(payload: &[u8]) -> Result<E, CodecError> {
    serde_json::from_slice(payload).map_err(|source| CodecError::Decode {
        routing_key: E::ROUTING_KEY.to_string(),
        source,
    })
}

// ============================================================================
// Tagged union
// ============================================================================

macro_rules! events {
    ($($variant:ident => $key:path),+ $(,)?) => {
        /// Every event type on the wire.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Event {
            $($variant($variant),)+
        }

        $(
            impl IntegrationEvent for $variant {
                const ROUTING_KEY: &'static str = $key;

                fn meta(&self) -> &EventMeta {
                    &self.meta
                }
            }

            impl From<$variant> for Event {
                fn from(event: $variant) -> Self {
                    Event::$variant(event)
                }
            }
        )+

        impl Event {
            pub fn routing_key(&self) -> &'static str {
                match self {
                    $(Event::$variant(_) => $key,)+
                }
            }

            pub fn meta(&self) -> &EventMeta {
                match self {
                    $(Event::$variant(e) => &e.meta,)+
                }
            }

            pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
                match self {
                    $(Event::$variant(e) => encode(e),)+
                }
            }

            /// Decode a payload using the routing key it arrived under.
            pub fn decode(routing_key: &str, payload: &[u8]) -> Result<Self, CodecError> {
                match routing_key {
                    $($key => decode::<$variant>(payload).map(Event::$variant),)+
                    other => Err(CodecError::UnknownRoutingKey(other.to_string())),
                }
            }
        }
    };
}

events! {
    OrderCreated => routing::ORDER_CREATED,
    OrderCancelled => routing::ORDER_CANCELLED,
    OrderStatusChanged => routing::ORDER_STATUS_CHANGED,
    OrderAwaitingValidation => routing::ORDER_AWAITING_VALIDATION,
    StockReturned => routing::ORDER_STOCK_RETURNED,
    OrderStockConfirmed => routing::ORDER_STOCK_CONFIRMED,
    GracePeriodExpired => routing::ORDER_GRACE_PERIOD_EXPIRED,
    StockConfirmed => routing::STOCK_CONFIRMED,
    StockRejected => routing::STOCK_REJECTED,
    OrderPaymentSucceeded => routing::PAYMENT_SUCCEEDED,
    OrderPaymentFailed => routing::PAYMENT_FAILED,
}

impl Event {
    pub fn event_id(&self) -> Uuid {
        self.meta().event_id
    }
}
