//! Fixed-interval, bounded-attempt readiness polling.
//!
//! Individual failed probes are never surfaced: only the terminal verdict
//! matters to callers.

use std::time::Duration;

use sidecar_core::HealthConfig;
use tokio::sync::watch;
use tracing::{debug, trace};

use super::probe::Probe;

/// Polling policy: a fixed interval, no backoff, bounded attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep between a failed attempt and the next one.
    pub interval: Duration,
    /// Attempt budget.
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 30,
        }
    }
}

impl From<&HealthConfig> for PollPolicy {
    fn from(config: &HealthConfig) -> Self {
        Self {
            interval: config.interval(),
            max_attempts: config.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Pending,
    Success,
    Failure,
}

/// One probe within a poll run. Reported to observers, never retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollAttempt {
    /// 1-based attempt number.
    pub index: u32,
    pub outcome: AttemptOutcome,
}

/// Terminal result of a poll run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessVerdict {
    /// A probe succeeded on attempt `attempts`.
    Ready { attempts: u32 },
    /// The attempt budget ran out.
    TimedOut { attempts: u32 },
    /// Shutdown was signalled before a verdict was reached.
    Cancelled { attempts: u32 },
}

impl ReadinessVerdict {
    pub const fn attempts(self) -> u32 {
        match self {
            Self::Ready { attempts } | Self::TimedOut { attempts } | Self::Cancelled { attempts } => {
                attempts
            }
        }
    }

    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Repeatedly probes until ready, out of attempts, or shut down.
#[derive(Debug, Clone, Default)]
pub struct HealthPoller {
    policy: PollPolicy,
}

impl HealthPoller {
    pub const fn new(policy: PollPolicy) -> Self {
        Self { policy }
    }

    pub const fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Poll `probe` until a verdict is reached.
    ///
    /// `shutdown` flipping to `true` (or its sender going away) stops the loop
    /// within one interval, including mid-probe.
    pub async fn run<P: Probe>(
        &self,
        probe: &P,
        shutdown: watch::Receiver<bool>,
    ) -> ReadinessVerdict {
        self.run_observed(probe, shutdown, |_| {}).await
    }

    /// Like [`run`](Self::run), reporting every attempt to `on_attempt`.
    pub async fn run_observed<P, F>(
        &self,
        probe: &P,
        mut shutdown: watch::Receiver<bool>,
        mut on_attempt: F,
    ) -> ReadinessVerdict
    where
        P: Probe,
        F: FnMut(&PollAttempt),
    {
        let mut attempts = 0;
        while attempts < self.policy.max_attempts {
            if *shutdown.borrow() {
                return ReadinessVerdict::Cancelled { attempts };
            }

            attempts += 1;
            on_attempt(&PollAttempt {
                index: attempts,
                outcome: AttemptOutcome::Pending,
            });

            let healthy = tokio::select! {
                healthy = probe.check() => healthy,
                () = shutdown_signalled(&mut shutdown) => {
                    return ReadinessVerdict::Cancelled { attempts };
                }
            };

            if healthy {
                on_attempt(&PollAttempt {
                    index: attempts,
                    outcome: AttemptOutcome::Success,
                });
                debug!(attempt = attempts, "Health probe succeeded");
                return ReadinessVerdict::Ready { attempts };
            }

            on_attempt(&PollAttempt {
                index: attempts,
                outcome: AttemptOutcome::Failure,
            });
            trace!(
                attempt = attempts,
                max_attempts = self.policy.max_attempts,
                "Health probe failed"
            );

            if attempts < self.policy.max_attempts {
                tokio::select! {
                    () = tokio::time::sleep(self.policy.interval) => {}
                    () = shutdown_signalled(&mut shutdown) => {
                        return ReadinessVerdict::Cancelled { attempts };
                    }
                }
            }
        }

        ReadinessVerdict::TimedOut { attempts }
    }
}

/// Resolves once shutdown is requested or the sender is gone.
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
