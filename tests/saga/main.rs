//! Gherkin scenarios for the order saga.
//!
//! ```bash
//! cargo test --test saga
//! ```
//!
//! Component scenarios drive handlers and coordinators directly over a mock
//! bus; the end-to-end scenario runs all three services on the in-process
//! broker.

#[path = "../common/mod.rs"]
mod common;
mod steps;

use cucumber::World;
use steps::SagaWorld;

#[tokio::main]
async fn main() {
    SagaWorld::cucumber()
        .fail_on_skipped()
        .run_and_exit("tests/saga/features")
        .await;
}
