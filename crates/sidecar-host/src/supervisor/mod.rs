//! Worker subprocess supervision.

pub mod manager;

pub use manager::{ProcessHandle, ProcessSupervisor, SpawnConfig, StartError, SubprocessError};
