//! Order service: owns orders and drives them through the saga.

pub mod commands;
pub mod coordinator;
pub mod grace_period;
pub mod handler;
pub mod saga;
pub mod state_machine;

pub use commands::{CommandError, CommandOutcome, CreateOrderResult, OrderCommandService};
pub use coordinator::{AdvanceError, Advanced, OrderCoordinator};
pub use grace_period::GracePeriodWatcher;
pub use handler::{BuyerNotificationHandler, OrderEventHandler};
pub use saga::{plan, Inbound, SagaContext, Step};
pub use state_machine::{evaluate, Decision, TransitionError, Trigger};
