//! Service assembly.
//!
//! Each `start` function subscribes its queues, spawns one worker per queue
//! and returns a handle that drains them on shutdown. Stores, bus and
//! gateway are passed in so the binaries and tests choose implementations.
//!
//! Queue names are `<service>.<event>`; each queue is bound to exactly one
//! routing key.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bus::{BusError, MessageBus};
use crate::storage::StorageError;
use crate::utils::retry::BackoffPolicy;
use crate::worker::{run_consumer, MessageHandler};

pub mod menu;
pub mod order;
pub mod payment;

pub use menu::{start_menu_service, MenuService};
pub use order::{start_order_service, OrderService};
pub use payment::{start_payment_service, PaymentService};

/// Errors raised while starting a service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Background tasks of one running service.
pub struct ServiceHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServiceHandle {
    pub(crate) fn new(name: &'static str) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            name,
            shutdown,
            tasks: Vec::new(),
        }
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(crate) fn push(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    /// Subscribe `queue` to `binding` and run `handler` over it.
    pub(crate) async fn spawn_worker(
        &mut self,
        bus: &Arc<dyn MessageBus>,
        queue: &str,
        binding: &str,
        handler: Arc<dyn MessageHandler>,
        policy: BackoffPolicy,
    ) -> Result<(), BusError> {
        let subscription = bus.subscribe(queue, binding).await?;
        let queue = queue.to_string();
        let shutdown = self.shutdown_signal();
        let service = self.name;
        self.push(tokio::spawn(async move {
            if let Err(e) = run_consumer(queue.clone(), subscription, handler, policy, shutdown).await {
                error!(service, queue = %queue, error = %e, "Worker exited with error");
            }
        }));
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal every task to stop and wait up to `drain_timeout` for them.
    ///
    /// Workers finish their in-flight message first. Tasks still running
    /// at the deadline are aborted.
    pub async fn shutdown(self, drain_timeout: Duration) {
        info!(service = self.name, tasks = self.tasks.len(), "Stopping service");
        self.shutdown.send_replace(true);

        let deadline = tokio::time::Instant::now() + drain_timeout;
        for mut task in self.tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(service = self.name, error = %e, "Task panicked"),
                Err(_) => {
                    warn!(service = self.name, "Task did not drain in time, aborting");
                    task.abort();
                }
            }
        }
        info!(service = self.name, "Service stopped");
    }
}
