//! Readiness polling against the worker's health endpoint.

mod poller;
mod probe;

pub(crate) use poller::shutdown_signalled;
pub use poller::{AttemptOutcome, HealthPoller, PollAttempt, PollPolicy, ReadinessVerdict};
pub use probe::{HttpProbe, Probe};
