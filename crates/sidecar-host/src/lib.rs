//! Sidecar Host Library
//!
//! Coordinates a single background worker process:
//! - Supervision of the worker subprocess and its stdin/stdout/stderr
//! - Fan-out of worker output lines to observers
//! - Bounded, fixed-interval readiness polling
//! - The readiness state machine guarding against double initialization
//! - A gateway that only forwards the user action once the worker is ready

pub mod endpoint;
pub mod error;
pub mod gateway;
pub mod health;
mod http;
pub mod lifecycle;
pub mod relay;
pub mod supervisor;

pub use endpoint::WorkerEndpoint;
pub use error::CoordinatorError;
pub use gateway::{ActionError, ActionGateway, ActionRequest, ActionResult};
pub use lifecycle::{LifecycleController, Readiness, ReadinessState, StateChange};
pub use relay::{LogLine, LogRelay, LogStream, StreamFilter};
