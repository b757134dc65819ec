//! Relay module types.

use serde::Serialize;

/// Event channel name for worker stdout lines.
pub const STDOUT_CHANNEL: &str = "sidecar-stdout";
/// Event channel name for worker stderr lines.
pub const STDERR_CHANNEL: &str = "sidecar-stderr";

/// Which worker output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    /// Presentation event channel carrying this stream.
    pub const fn channel(self) -> &'static str {
        match self {
            Self::Stdout => STDOUT_CHANNEL,
            Self::Stderr => STDERR_CHANNEL,
        }
    }
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// A single line of worker output.
///
/// `sequence` increases monotonically across both streams in emission order,
/// but only per-stream ordering reflects what the worker actually wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub stream: LogStream,
    pub text: String,
    pub sequence: u64,
}

/// Selects which streams a subscription receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamFilter {
    #[default]
    All,
    Only(LogStream),
}

impl StreamFilter {
    pub const fn stdout() -> Self {
        Self::Only(LogStream::Stdout)
    }

    pub const fn stderr() -> Self {
        Self::Only(LogStream::Stderr)
    }

    pub fn matches(self, stream: LogStream) -> bool {
        match self {
            Self::All => true,
            Self::Only(s) => s == stream,
        }
    }
}
