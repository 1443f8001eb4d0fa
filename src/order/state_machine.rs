//! Order lifecycle transition table.
//!
//! Every status change goes through [`evaluate`]. It is pure: given the
//! current status and a trigger it says whether to advance, to do nothing
//! because the trigger was already applied, or to refuse.
//!
//! | Trigger            | From                                         | To                 |
//! |--------------------|----------------------------------------------|--------------------|
//! | GracePeriodExpired | Submitted                                    | AwaitingValidation |
//! | StockConfirmed     | AwaitingValidation                           | StockConfirmed     |
//! | StockRejected      | AwaitingValidation                           | Cancelled          |
//! | PaymentSucceeded   | StockConfirmed                               | Paid               |
//! | PaymentFailed      | StockConfirmed                               | Cancelled          |
//! | CancelRequested    | Submitted, AwaitingValidation, StockConfirmed | Cancelled          |
//! | ShipRequested      | Paid                                         | Shipped            |

use std::fmt;

use crate::domain::OrderStatus;

/// What caused a transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    GracePeriodExpired,
    StockConfirmed,
    StockRejected,
    PaymentSucceeded,
    PaymentFailed,
    CancelRequested,
    ShipRequested,
}

impl Trigger {
    /// Status the trigger moves an order to.
    pub fn target(&self) -> OrderStatus {
        match self {
            Trigger::GracePeriodExpired => OrderStatus::AwaitingValidation,
            Trigger::StockConfirmed => OrderStatus::StockConfirmed,
            Trigger::PaymentSucceeded => OrderStatus::Paid,
            Trigger::ShipRequested => OrderStatus::Shipped,
            Trigger::StockRejected | Trigger::PaymentFailed | Trigger::CancelRequested => {
                OrderStatus::Cancelled
            }
        }
    }

    /// Statuses the trigger may advance from.
    pub fn sources(&self) -> &'static [OrderStatus] {
        match self {
            Trigger::GracePeriodExpired => &[OrderStatus::Submitted],
            Trigger::StockConfirmed | Trigger::StockRejected => {
                &[OrderStatus::AwaitingValidation]
            }
            Trigger::PaymentSucceeded | Trigger::PaymentFailed => &[OrderStatus::StockConfirmed],
            Trigger::CancelRequested => &[
                OrderStatus::Submitted,
                OrderStatus::AwaitingValidation,
                OrderStatus::StockConfirmed,
            ],
            Trigger::ShipRequested => &[OrderStatus::Paid],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::GracePeriodExpired => "GracePeriodExpired",
            Trigger::StockConfirmed => "StockConfirmed",
            Trigger::StockRejected => "StockRejected",
            Trigger::PaymentSucceeded => "PaymentSucceeded",
            Trigger::PaymentFailed => "PaymentFailed",
            Trigger::CancelRequested => "CancelRequested",
            Trigger::ShipRequested => "ShipRequested",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trigger that does not apply to the order's current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{trigger} not allowed while order is {status}")]
pub struct TransitionError {
    pub trigger: Trigger,
    pub status: OrderStatus,
}

/// Result of checking a trigger against the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Apply the transition.
    Advance { from: OrderStatus, to: OrderStatus },
    /// The order is already where the trigger would put it.
    AlreadyApplied,
    /// The trigger is stale or out of order for this status.
    Rejected(TransitionError),
}

/// Check `trigger` against an order currently in `status`.
///
/// The no-op check comes first: a redelivered trigger finds the order in
/// the target status and must not be mistaken for a stale one.
pub fn evaluate(status: OrderStatus, trigger: Trigger) -> Decision {
    let to = trigger.target();
    if status == to {
        Decision::AlreadyApplied
    } else if trigger.sources().contains(&status) {
        Decision::Advance { from: status, to }
    } else {
        Decision::Rejected(TransitionError { trigger, status })
    }
}
