//! Readiness state and the controller that sequences worker startup.

mod controller;
mod state;

pub use controller::{LifecycleController, READY_NOTE};
pub use state::{InvalidTransition, Readiness, ReadinessState, StateChange};
