//! Pure saga steps for the Order service.
//!
//! [`plan`] takes the current order and an inbound trigger and returns the
//! order to persist plus the events to publish afterwards. Nothing here
//! touches a store or the bus; the handler shell does that.

use chrono::{DateTime, Utc};

use super::state_machine::{evaluate, Decision, TransitionError, Trigger};
use crate::domain::{Order, OrderStatus};
use crate::events::{
    Event, EventMeta, OrderAwaitingValidation, OrderCancelled, OrderPaymentFailed,
    OrderStatusChanged, OrderStockConfirmed, StockRejected, StockReturned,
};

/// What happened to an order, as far as the saga is concerned.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    GracePeriodExpired,
    StockConfirmed,
    StockRejected { reason: String },
    PaymentSucceeded,
    PaymentFailed { reason: String },
    CancelRequested { reason: String },
    ShipRequested,
}

impl Inbound {
    pub fn trigger(&self) -> Trigger {
        match self {
            Inbound::GracePeriodExpired => Trigger::GracePeriodExpired,
            Inbound::StockConfirmed => Trigger::StockConfirmed,
            Inbound::StockRejected { .. } => Trigger::StockRejected,
            Inbound::PaymentSucceeded => Trigger::PaymentSucceeded,
            Inbound::PaymentFailed { .. } => Trigger::PaymentFailed,
            Inbound::CancelRequested { .. } => Trigger::CancelRequested,
            Inbound::ShipRequested => Trigger::ShipRequested,
        }
    }

    pub fn stock_rejected(event: &StockRejected) -> Self {
        Inbound::StockRejected {
            reason: event.reason(),
        }
    }

    pub fn payment_failed(event: &OrderPaymentFailed) -> Self {
        Inbound::PaymentFailed {
            reason: format!("Payment failed: {} ({})", event.reason, event.code),
        }
    }

    /// History and cancellation text for the transition.
    fn description(&self) -> String {
        match self {
            Inbound::GracePeriodExpired => "Grace period ended, validating stock".to_string(),
            Inbound::StockConfirmed => "Stock confirmed".to_string(),
            Inbound::PaymentSucceeded => "Payment succeeded".to_string(),
            Inbound::ShipRequested => "Order shipped".to_string(),
            Inbound::StockRejected { reason }
            | Inbound::PaymentFailed { reason }
            | Inbound::CancelRequested { reason } => reason.clone(),
        }
    }
}

/// Inputs the saga needs besides the order.
#[derive(Debug, Clone)]
pub struct SagaContext {
    /// Currency sent with payment requests.
    pub currency: String,
    pub now: DateTime<Utc>,
}

/// Outcome of applying a trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Persist `order`, then publish `events` in order.
    Apply { order: Order, events: Vec<Event> },
    /// Already applied; nothing to persist. `replay` re-sends the
    /// downstream requests of the transition that got the order here, in
    /// case their publish was lost after the update committed.
    AlreadyApplied { replay: Vec<Event> },
}

/// Decide the next step for `order`.
///
/// A trigger the current status does not accept comes back as
/// `TransitionError`; event handlers log and ack it, commands report it.
pub fn plan(order: &Order, inbound: &Inbound, ctx: &SagaContext) -> Result<Step, TransitionError> {
    let (from, to) = match evaluate(order.status, inbound.trigger()) {
        Decision::Advance { from, to } => (from, to),
        Decision::AlreadyApplied => {
            return Ok(Step::AlreadyApplied {
                replay: replay(order, inbound, ctx),
            })
        }
        Decision::Rejected(e) => return Err(e),
    };

    let description = inbound.description();
    let mut next = order.clone();
    next.record_transition(to, description.clone(), ctx.now);

    let mut events = progress_events(order, inbound, from, &description, ctx);
    events.push(
        OrderStatusChanged {
            meta: EventMeta::new(ctx.now),
            order_id: order.id,
            buyer_id: order.buyer_id.clone(),
            old_status: from,
            new_status: to,
            description,
        }
        .into(),
    );

    Ok(Step::Apply {
        order: next,
        events,
    })
}

/// Requests to other services that a transition out of `from` sends.
fn progress_events(
    order: &Order,
    inbound: &Inbound,
    from: OrderStatus,
    reason: &str,
    ctx: &SagaContext,
) -> Vec<Event> {
    match inbound {
        Inbound::GracePeriodExpired => vec![OrderAwaitingValidation {
            meta: EventMeta::new(ctx.now),
            order_id: order.id,
            items: order.stock_items(),
        }
        .into()],
        Inbound::StockConfirmed => vec![OrderStockConfirmed {
            meta: EventMeta::new(ctx.now),
            order_id: order.id,
            buyer_id: order.buyer_id.clone(),
            amount: order.total_price,
            currency: ctx.currency.clone(),
            payment_method: order.payment_method.clone(),
        }
        .into()],
        Inbound::StockRejected { .. } => vec![cancelled(order, reason, ctx.now)],
        Inbound::PaymentFailed { .. } => vec![
            cancelled(order, reason, ctx.now),
            stock_returned(order, ctx.now),
        ],
        // A reservation may exist or be on its way; Menu voids the order if
        // it never reserved.
        Inbound::CancelRequested { .. }
            if matches!(
                from,
                OrderStatus::AwaitingValidation | OrderStatus::StockConfirmed
            ) =>
        {
            vec![cancelled(order, reason, ctx.now), stock_returned(order, ctx.now)]
        }
        Inbound::CancelRequested { .. } => vec![cancelled(order, reason, ctx.now)],
        Inbound::PaymentSucceeded | Inbound::ShipRequested => Vec::new(),
    }
}

/// Progress events of the order's last transition, if `inbound` is the
/// trigger that could have made it.
///
/// Downstream handlers are idempotent per order, so a repeat is harmless.
/// The status-changed notice is not repeated.
fn replay(order: &Order, inbound: &Inbound, ctx: &SagaContext) -> Vec<Event> {
    let from = order
        .history
        .iter()
        .rev()
        .nth(1)
        .map_or(OrderStatus::Submitted, |entry| entry.status);
    match evaluate(from, inbound.trigger()) {
        Decision::Advance { to, .. } if to == order.status => {
            progress_events(order, inbound, from, &order.description, ctx)
        }
        _ => Vec::new(),
    }
}

fn cancelled(order: &Order, reason: &str, at: DateTime<Utc>) -> Event {
    OrderCancelled {
        meta: EventMeta::new(at),
        order_id: order.id,
        buyer_id: order.buyer_id.clone(),
        reason: reason.to_string(),
    }
    .into()
}

fn stock_returned(order: &Order, at: DateTime<Utc>) -> Event {
    StockReturned {
        meta: EventMeta::new(at),
        order_id: order.id,
        items: order.stock_items(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FailureCode, NewOrder, OrderItem, StockValidationItem};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn order(status: OrderStatus) -> Order {
        let mut order = NewOrder {
            request_id: Uuid::new_v4(),
            buyer_id: "buyer-1".to_string(),
            items: vec![OrderItem {
                menu_item_id: 1,
                menu_item_name: "Bibimbap".to_string(),
                picture_url: None,
                unit_price: dec!(10.00),
                quantity: 2,
                discount: dec!(0),
            }],
            total_price: dec!(20.00),
            payment_method: None,
            created_at: Utc::now(),
        }
        .into_order(11);
        order.status = status;
        order
    }

    fn ctx() -> SagaContext {
        SagaContext {
            currency: "USD".to_string(),
            now: Utc::now(),
        }
    }

    fn keys(step: &Step) -> Vec<&'static str> {
        match step {
            Step::Apply { events, .. } => events.iter().map(Event::routing_key).collect(),
            Step::AlreadyApplied { replay } => replay.iter().map(Event::routing_key).collect(),
        }
    }

    #[test]
    fn test_grace_period_requests_validation() {
        let step = plan(&order(OrderStatus::Submitted), &Inbound::GracePeriodExpired, &ctx()).unwrap();

        assert_eq!(
            keys(&step),
            vec!["order.awaiting-validation", "order.status-changed"]
        );
        let Step::Apply { order, events } = step else {
            panic!("expected transition");
        };
        assert_eq!(order.status, OrderStatus::AwaitingValidation);
        assert_eq!(order.history.len(), 1);
        match &events[0] {
            Event::OrderAwaitingValidation(e) => assert_eq!(
                e.items,
                vec![StockValidationItem {
                    menu_item_id: 1,
                    requested_quantity: 2
                }]
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_stock_confirmed_carries_payment_details() {
        let step = plan(&order(OrderStatus::AwaitingValidation), &Inbound::StockConfirmed, &ctx()).unwrap();
        let Step::Apply { events, .. } = step else {
            panic!("expected transition");
        };
        match &events[0] {
            Event::OrderStockConfirmed(e) => {
                assert_eq!(e.amount, dec!(20.00));
                assert_eq!(e.currency, "USD");
                assert_eq!(e.buyer_id, "buyer-1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_payment_failure_compensates() {
        let failed = OrderPaymentFailed {
            meta: EventMeta::new(Utc::now()),
            order_id: 11,
            payment_id: Uuid::new_v4(),
            reason: "Card was declined by issuer".to_string(),
            code: FailureCode::CardDeclined,
        };
        let step = plan(
            &order(OrderStatus::StockConfirmed),
            &Inbound::payment_failed(&failed),
            &ctx(),
        )
        .unwrap();

        assert_eq!(
            keys(&step),
            vec!["order.cancelled", "order.stock-returned", "order.status-changed"]
        );
        let Step::Apply { order, .. } = step else {
            panic!("expected transition");
        };
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(order.description.contains("declined"));
    }

    #[test]
    fn test_stock_rejection_does_not_return_stock() {
        let step = plan(
            &order(OrderStatus::AwaitingValidation),
            &Inbound::StockRejected {
                reason: "Stock rejected: menu item 1: requested 2, available 0".to_string(),
            },
            &ctx(),
        )
        .unwrap();
        assert_eq!(keys(&step), vec!["order.cancelled", "order.status-changed"]);
    }

    #[test]
    fn test_buyer_cancel_returns_stock_only_once_validation_started() {
        let cancel = Inbound::CancelRequested {
            reason: "Cancelled by buyer".to_string(),
        };

        let submitted = plan(&order(OrderStatus::Submitted), &cancel, &ctx()).unwrap();
        assert_eq!(keys(&submitted), vec!["order.cancelled", "order.status-changed"]);

        for status in [OrderStatus::AwaitingValidation, OrderStatus::StockConfirmed] {
            let step = plan(&order(status), &cancel, &ctx()).unwrap();
            assert_eq!(
                keys(&step),
                vec!["order.cancelled", "order.stock-returned", "order.status-changed"]
            );
        }
    }

    fn applied(step: Step) -> Order {
        match step {
            Step::Apply { order, .. } => order,
            other => panic!("expected transition, got {other:?}"),
        }
    }

    #[test]
    fn test_repeated_trigger_resends_downstream_requests() {
        let validating = applied(
            plan(&order(OrderStatus::Submitted), &Inbound::GracePeriodExpired, &ctx()).unwrap(),
        );
        let again = plan(&validating, &Inbound::GracePeriodExpired, &ctx()).unwrap();
        assert_eq!(keys(&again), vec!["order.awaiting-validation"]);

        let confirmed = applied(plan(&validating, &Inbound::StockConfirmed, &ctx()).unwrap());
        let again = plan(&confirmed, &Inbound::StockConfirmed, &ctx()).unwrap();
        assert_eq!(keys(&again), vec!["order.stock-confirmed"]);

        let failed = Inbound::PaymentFailed {
            reason: "Payment failed: Card was declined by issuer (CARD_DECLINED)".to_string(),
        };
        let cancelled = applied(plan(&confirmed, &failed, &ctx()).unwrap());
        let again = plan(&cancelled, &failed, &ctx()).unwrap();
        assert_eq!(keys(&again), vec!["order.cancelled", "order.stock-returned"]);
        let Step::AlreadyApplied { replay } = again else {
            panic!("expected replay");
        };
        match &replay[0] {
            Event::OrderCancelled(e) => assert!(e.reason.contains("declined")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_replay_only_for_the_trigger_that_applied() {
        let validating = applied(
            plan(&order(OrderStatus::Submitted), &Inbound::GracePeriodExpired, &ctx()).unwrap(),
        );
        let rejected = applied(
            plan(
                &validating,
                &Inbound::StockRejected {
                    reason: "Stock rejected: menu item 1: requested 2, available 0".to_string(),
                },
                &ctx(),
            )
            .unwrap(),
        );

        let late_failure = Inbound::PaymentFailed {
            reason: "Payment failed".to_string(),
        };
        assert_eq!(
            plan(&rejected, &late_failure, &ctx()).unwrap(),
            Step::AlreadyApplied { replay: Vec::new() }
        );
    }

    #[test]
    fn test_repeat_and_stale_triggers() {
        assert_eq!(
            plan(&order(OrderStatus::Paid), &Inbound::PaymentSucceeded, &ctx()).unwrap(),
            Step::AlreadyApplied { replay: Vec::new() }
        );
        assert!(plan(&order(OrderStatus::Cancelled), &Inbound::StockConfirmed, &ctx()).is_err());
    }
}
