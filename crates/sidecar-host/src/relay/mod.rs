//! Log relay: fans worker output lines out to any number of observers.
//!
//! The supervisor publishes every captured stdout/stderr line here; the
//! controller and presentation layers subscribe with a stream filter.
//! Delivery is live-only: a subscriber sees lines emitted after it attached.

mod fanout;
mod types;

pub use fanout::{LogRelay, LogSubscription};
pub use types::*;
