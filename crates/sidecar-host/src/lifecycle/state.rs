//! Readiness state machine.

use std::fmt;

use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the state-change broadcast. Transitions are rare.
const STATE_CHANNEL_CAPACITY: usize = 16;

/// Readiness of the worker as seen by the host.
///
/// ```text
/// Uninitialized -> Starting -> Polling -> Ready
///                     |           \-----> TimedOut
///                     \-----------------> StartFailed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    Uninitialized,
    Starting,
    Polling,
    Ready,
    TimedOut,
    StartFailed,
}

impl ReadinessState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Starting => "starting",
            Self::Polling => "polling",
            Self::Ready => "ready",
            Self::TimedOut => "timed_out",
            Self::StartFailed => "start_failed",
        }
    }

    /// No transition leaves a terminal state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::TimedOut | Self::StartFailed)
    }

    pub const fn is_failure(self) -> bool {
        matches!(self, Self::TimedOut | Self::StartFailed)
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized, Self::Starting)
                | (Self::Starting, Self::Polling | Self::StartFailed)
                | (Self::Polling, Self::Ready | Self::TimedOut)
        )
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state plus the human-readable note recorded with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub state: ReadinessState,
    pub note: Option<String>,
}

/// A transition, as delivered to state subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub from: ReadinessState,
    pub to: ReadinessState,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid readiness transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ReadinessState,
    pub to: ReadinessState,
}

/// Owns the current [`Readiness`] and publishes every transition.
///
/// Not synchronised itself; the controller keeps it behind a mutex so the
/// check and the update happen together.
#[derive(Debug)]
pub(crate) struct StateMachine {
    current: Readiness,
    changes: broadcast::Sender<StateChange>,
}

impl StateMachine {
    pub(crate) fn new() -> Self {
        let (changes, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            current: Readiness {
                state: ReadinessState::Uninitialized,
                note: None,
            },
            changes,
        }
    }

    pub(crate) const fn current(&self) -> &Readiness {
        &self.current
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    pub(crate) fn transition(
        &mut self,
        to: ReadinessState,
        note: Option<String>,
    ) -> Result<StateChange, InvalidTransition> {
        let from = self.current.state;
        if !from.can_transition_to(to) {
            return Err(InvalidTransition { from, to });
        }
        self.current = Readiness {
            state: to,
            note: note.clone(),
        };
        let change = StateChange { from, to, note };
        // No subscribers is fine.
        let _ = self.changes.send(change.clone());
        Ok(change)
    }
}
