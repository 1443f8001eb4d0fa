use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{watch, RwLock};

use super::*;
use crate::bus::{recorded_delivery, Settlement, SettlementLog};
use crate::events::GracePeriodExpired;

/// Fails the first `failures` calls, then succeeds.
struct FlakyHandler {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyHandler {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl MessageHandler for FlakyHandler {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn handle(&self, _event: Event, _attempt: u32) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(HandlerError::Transient("database unavailable".to_string()));
        }
        Ok(())
    }
}

fn payload(order_id: i64) -> Vec<u8> {
    Event::from(GracePeriodExpired::new(order_id, Utc::now()))
        .encode()
        .unwrap()
}

fn new_log() -> SettlementLog {
    std::sync::Arc::new(RwLock::new(Vec::new()))
}

fn policy() -> BackoffPolicy {
    BackoffPolicy::Fixed(Duration::from_millis(1))
}

#[tokio::test]
async fn test_success_acks_each_delivery_once() {
    let log = new_log();
    let deliveries = vec![
        recorded_delivery("order.grace-period-expired", payload(1), 1, &log),
        recorded_delivery("order.grace-period-expired", payload(2), 1, &log),
    ];
    let handler = Arc::new(FlakyHandler::new(0));
    let (_tx, rx) = watch::channel(false);

    run_consumer(
        "q".to_string(),
        futures::stream::iter(deliveries).boxed(),
        handler.clone(),
        policy(),
        rx,
    )
    .await
    .unwrap();

    assert_eq!(*log.read().await, vec![Settlement::Acked, Settlement::Acked]);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_handler_failure_nacks_and_continues() {
    let log = new_log();
    let deliveries = vec![
        recorded_delivery("order.grace-period-expired", payload(1), 1, &log),
        recorded_delivery("order.grace-period-expired", payload(1), 2, &log),
    ];
    let (_tx, rx) = watch::channel(false);

    run_consumer(
        "q".to_string(),
        futures::stream::iter(deliveries).boxed(),
        Arc::new(FlakyHandler::new(1)),
        policy(),
        rx,
    )
    .await
    .unwrap();

    assert_eq!(*log.read().await, vec![Settlement::Nacked, Settlement::Acked]);
}

#[tokio::test]
async fn test_malformed_payload_rejects_and_terminates() {
    let log = new_log();
    let deliveries = vec![
        recorded_delivery("order.grace-period-expired", b"{not json".to_vec(), 1, &log),
        recorded_delivery("order.grace-period-expired", payload(1), 1, &log),
    ];
    let handler = Arc::new(FlakyHandler::new(0));
    let (_tx, rx) = watch::channel(false);

    let err = run_consumer(
        "q".to_string(),
        futures::stream::iter(deliveries).boxed(),
        handler.clone(),
        policy(),
        rx,
    )
    .await
    .unwrap_err();

    assert!(err.is_malformed());
    assert_eq!(*log.read().await, vec![Settlement::Rejected]);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_routing_key_is_malformed() {
    let log = new_log();
    let deliveries = vec![recorded_delivery("order.teleported", payload(1), 1, &log)];
    let (_tx, rx) = watch::channel(false);

    let err = run_consumer(
        "q".to_string(),
        futures::stream::iter(deliveries).boxed(),
        Arc::new(FlakyHandler::new(0)),
        policy(),
        rx,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        HandlerError::Malformed {
            source: CodecError::UnknownRoutingKey(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_shutdown_stops_idle_worker() {
    let (tx, rx) = watch::channel(false);
    let worker = tokio::spawn(run_consumer(
        "q".to_string(),
        futures::stream::pending().boxed(),
        Arc::new(FlakyHandler::new(0)),
        policy(),
        rx,
    ));

    tx.send_replace(true);
    let result = tokio::time::timeout(Duration::from_secs(1), worker)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
