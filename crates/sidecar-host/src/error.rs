//! Construction-time errors for the coordinator.
//!
//! Runtime failures never surface here: startup and polling failures become
//! readiness states, and action failures are [`crate::gateway::ActionError`].

/// Errors building a coordinator from configuration.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
