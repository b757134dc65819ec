//! Sidecar Core Library
//!
//! Shared functionality for the sidecar host:
//! - Configuration model and hierarchical resolution
//! - Tracing/logging initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::{ActionConfig, Config, HealthConfig, LogConfig, SidecarConfig};
pub use error::{Error, Result};
