//! Payment service: charges confirmed orders exactly once.

pub mod coordinator;
pub mod gateway;
pub mod handler;

pub use coordinator::{PaymentCoordinator, PaymentError, PaymentOutcome, PaymentRequest};
pub use gateway::{ChargeOutcome, ChargeRequest, GatewayError, PaymentGateway, SimulatedGateway};
pub use handler::PaymentEventHandler;
