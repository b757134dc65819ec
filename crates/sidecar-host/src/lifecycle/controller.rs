//! Startup sequencing and the single source of truth for readiness.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use sidecar_core::Config;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::state::{Readiness, ReadinessState, StateChange, StateMachine};
use crate::endpoint::WorkerEndpoint;
use crate::error::CoordinatorError;
use crate::health::{HealthPoller, HttpProbe, PollPolicy, ReadinessVerdict, shutdown_signalled};
use crate::relay::{LogRelay, LogStream, LogSubscription, StreamFilter};
use crate::supervisor::{ProcessHandle, ProcessSupervisor, SpawnConfig};

/// Note recorded when the worker answers its health check.
pub const READY_NOTE: &str = "Backend ready for requests.";

/// Upper bound on waiting for a background task during shutdown.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Drives the worker from launch to a terminal readiness state.
///
/// Cheap to clone; all clones share one worker and one state.
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<Inner>,
}

struct Inner {
    supervisor: ProcessSupervisor,
    relay: LogRelay,
    poller: HealthPoller,
    probe: HttpProbe,
    endpoint: WorkerEndpoint,
    machine: Mutex<StateMachine>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Most recent stderr line, quoted in failure notes.
    last_stderr: Arc<Mutex<Option<String>>>,
}

impl LifecycleController {
    pub fn new(config: &Config) -> Result<Self, CoordinatorError> {
        let endpoint = WorkerEndpoint::parse(&config.health.base_url)?;
        if config.sidecar.program.as_os_str().is_empty() {
            return Err(CoordinatorError::Config("sidecar program is empty".into()));
        }
        let probe = HttpProbe::new(
            endpoint.url(&config.health.path),
            config.health.probe_timeout(),
        )?;
        let relay = LogRelay::with_defaults();
        let supervisor = ProcessSupervisor::new(SpawnConfig::from(&config.sidecar), relay.clone());
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                supervisor,
                relay,
                poller: HealthPoller::new(PollPolicy::from(&config.health)),
                probe,
                endpoint,
                machine: Mutex::new(StateMachine::new()),
                shutdown_tx,
                tasks: Mutex::new(Vec::new()),
                last_stderr: Arc::new(Mutex::new(None)),
            }),
        })
    }

    /// Begin the startup sequence in the background.
    ///
    /// Only the first call launches anything; later calls (concurrent or not)
    /// are no-ops and return `false`. Must be called from within a Tokio
    /// runtime.
    pub fn start(&self) -> bool {
        if *self.inner.shutdown_tx.borrow() {
            debug!("Start ignored, coordinator is shut down");
            return false;
        }
        if !self.inner.transition(ReadinessState::Starting, None) {
            debug!(state = %self.state(), "Start ignored, already initialized");
            return false;
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(inner.run_startup());
        self.inner.track(task);
        true
    }

    pub fn state(&self) -> ReadinessState {
        self.inner.machine().current().state
    }

    pub fn readiness(&self) -> Readiness {
        self.inner.machine().current().clone()
    }

    /// Receive every transition made after this call.
    pub fn subscribe_state(&self) -> broadcast::Receiver<StateChange> {
        self.inner.machine().subscribe()
    }

    /// Subscribe to worker output. Subscribe before [`start`](Self::start)
    /// to see the first lines.
    pub fn subscribe_logs(&self, filter: StreamFilter) -> LogSubscription {
        self.inner.relay.subscribe(filter)
    }

    /// Resolve once readiness is terminal or the coordinator shuts down.
    pub async fn wait_settled(&self) -> Readiness {
        let mut changes = self.subscribe_state();
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        loop {
            let current = self.readiness();
            if current.state.is_terminal() || *shutdown.borrow() {
                return current;
            }
            tokio::select! {
                change = changes.recv() => {
                    if matches!(change, Err(broadcast::error::RecvError::Closed)) {
                        return self.readiness();
                    }
                }
                () = shutdown_signalled(&mut shutdown) => return self.readiness(),
            }
        }
    }

    pub fn endpoint(&self) -> &WorkerEndpoint {
        &self.inner.endpoint
    }

    /// Handle of the live worker, if any.
    pub async fn process(&self) -> Option<ProcessHandle> {
        self.inner.supervisor.handle().await
    }

    /// Number of worker processes ever spawned (0 or 1).
    pub fn launch_count(&self) -> usize {
        self.inner.supervisor.launch_count()
    }

    /// Cancel polling, stop the worker and close the log relay.
    ///
    /// Readiness keeps whatever value it had. Idempotent; returns `true` if
    /// a worker was running.
    pub async fn shutdown(&self) -> bool {
        self.inner.shutdown_tx.send_replace(true);

        let tasks = std::mem::take(
            &mut *self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for mut task in tasks {
            if tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut task).await.is_err() {
                warn!("Background task did not finish, aborting");
                task.abort();
            }
        }

        let was_running = self.inner.supervisor.stop().await;
        self.inner.relay.close();
        if was_running {
            info!("Backend stopped.");
        } else {
            debug!("Backend was not running.");
        }
        was_running
    }
}

impl Inner {
    fn machine(&self) -> MutexGuard<'_, StateMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    fn transition(&self, to: ReadinessState, note: Option<String>) -> bool {
        let result = self.machine().transition(to, note);
        match result {
            Ok(change) if change.to.is_failure() => {
                error!(from = %change.from, to = %change.to, note = ?change.note, "Sidecar readiness changed");
                true
            }
            Ok(change) => {
                info!(from = %change.from, to = %change.to, note = ?change.note, "Sidecar readiness changed");
                true
            }
            Err(e) => {
                debug!(error = %e, "Readiness transition rejected");
                false
            }
        }
    }

    fn failure_note(&self, summary: String) -> String {
        let last = self
            .last_stderr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match last {
            Some(line) => format!("{summary} (last stderr: {line})"),
            None => summary,
        }
    }

    /// `Starting -> Polling`, unless shutdown arrived while launching.
    fn enter_polling(&self, shutdown: &watch::Receiver<bool>, handle: &ProcessHandle) -> bool {
        if *shutdown.borrow() {
            debug!(process_id = %handle.id, "Shutdown during launch, not polling");
            return false;
        }
        self.transition(
            ReadinessState::Polling,
            Some(format!("Waiting for {} (process {})", self.probe.url(), handle.id)),
        )
    }

    async fn run_startup(self: Arc<Self>) {
        let shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow() {
            self.transition(
                ReadinessState::StartFailed,
                Some("shut down before launch".into()),
            );
            return;
        }

        // Subscribe before launch so the first lines are not missed.
        let stderr = self.relay.subscribe(StreamFilter::Only(LogStream::Stderr));

        let handle = match self.supervisor.launch().await {
            Ok(handle) => handle,
            Err(e) => {
                self.transition(ReadinessState::StartFailed, Some(e.to_string()));
                return;
            }
        };

        self.track(spawn_stderr_tracker(
            stderr,
            Arc::clone(&self.last_stderr),
            self.shutdown_tx.subscribe(),
        ));

        if !self.enter_polling(&shutdown, &handle) {
            return;
        }

        match self.poller.run(&self.probe, shutdown).await {
            ReadinessVerdict::Ready { attempts } => {
                debug!(attempts, "Health check passed");
                self.transition(ReadinessState::Ready, Some(READY_NOTE.into()));
            }
            ReadinessVerdict::TimedOut { attempts } => {
                let note = self.failure_note(format!(
                    "Worker did not become healthy after {attempts} attempts"
                ));
                self.transition(ReadinessState::TimedOut, Some(note));
            }
            ReadinessVerdict::Cancelled { attempts } => {
                debug!(attempts, "Readiness polling cancelled by shutdown");
            }
        }
    }
}

/// Remember the latest stderr line until the relay closes or shutdown.
///
/// Holds no reference to the controller, so a dropped controller still
/// releases the worker.
fn spawn_stderr_tracker(
    mut stderr: LogSubscription,
    last: Arc<Mutex<Option<String>>>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                line = stderr.next() => match line {
                    Some(line) => {
                        *last.lock().unwrap_or_else(PoisonError::into_inner) = Some(line.text);
                    }
                    None => break,
                },
                () = shutdown_signalled(&mut shutdown) => break,
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config_with_program(program: &str) -> Config {
        let mut config = Config::default();
        config.sidecar.program = program.into();
        config.health.base_url = "http://127.0.0.1:9".into();
        config.health.interval_ms = 10;
        config.health.max_attempts = 2;
        config
    }

    #[test]
    fn empty_base_url_rejected() {
        let mut config = Config::default();
        config.health.base_url = String::new();
        assert!(matches!(
            LifecycleController::new(&config),
            Err(CoordinatorError::Config(_))
        ));
    }

    #[test]
    fn empty_program_rejected() {
        let mut config = Config::default();
        config.sidecar.program = "".into();
        assert!(matches!(
            LifecycleController::new(&config),
            Err(CoordinatorError::Config(_))
        ));
    }

    #[test]
    fn starts_uninitialized() {
        let controller = LifecycleController::new(&Config::default()).unwrap();
        let readiness = controller.readiness();
        assert_eq!(readiness.state, ReadinessState::Uninitialized);
        assert!(readiness.note.is_none());
        assert_eq!(controller.launch_count(), 0);
        assert_eq!(controller.endpoint().base_url(), "http://localhost:8008");
    }

    #[tokio::test]
    async fn missing_executable_is_start_failed() {
        let controller =
            LifecycleController::new(&config_with_program("/nonexistent/sidecar-worker")).unwrap();

        assert!(controller.start());
        let settled = tokio::time::timeout(Duration::from_secs(5), controller.wait_settled())
            .await
            .expect("never settled");

        assert_eq!(settled.state, ReadinessState::StartFailed);
        assert!(settled.note.unwrap().contains("/nonexistent/sidecar-worker"));
        assert_eq!(controller.launch_count(), 0);
        assert!(!controller.shutdown().await);
    }

    #[tokio::test]
    async fn start_after_failure_is_noop() {
        let controller =
            LifecycleController::new(&config_with_program("/nonexistent/sidecar-worker")).unwrap();
        controller.start();
        controller.wait_settled().await;

        assert!(!controller.start());
        assert_eq!(controller.state(), ReadinessState::StartFailed);
    }

    #[tokio::test]
    async fn start_after_shutdown_is_refused() {
        let controller = LifecycleController::new(&Config::default()).unwrap();
        assert!(!controller.shutdown().await);

        assert!(!controller.start());
        assert_eq!(controller.state(), ReadinessState::Uninitialized);
        assert_eq!(controller.launch_count(), 0);
    }

    #[tokio::test]
    async fn wait_settled_returns_on_shutdown() {
        let controller = LifecycleController::new(&Config::default()).unwrap();
        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.wait_settled().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.shutdown().await;

        let readiness = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter hung")
            .unwrap();
        assert_eq!(readiness.state, ReadinessState::Uninitialized);
    }

    #[tokio::test]
    async fn shutdown_during_launch_skips_polling() {
        let controller = LifecycleController::new(&Config::default()).unwrap();
        let inner = &controller.inner;
        assert!(inner.transition(ReadinessState::Starting, None));
        let mut changes = controller.subscribe_state();
        let shutdown = inner.shutdown_tx.subscribe();
        inner.shutdown_tx.send_replace(true);

        let handle = ProcessHandle {
            id: "launch-1".into(),
            pid: None,
        };
        assert!(!inner.enter_polling(&shutdown, &handle));

        assert_eq!(controller.state(), ReadinessState::Starting);
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn enter_polling_without_shutdown_transitions() {
        let controller = LifecycleController::new(&Config::default()).unwrap();
        let inner = &controller.inner;
        assert!(inner.transition(ReadinessState::Starting, None));
        let shutdown = inner.shutdown_tx.subscribe();

        let handle = ProcessHandle {
            id: "launch-1".into(),
            pid: None,
        };
        assert!(inner.enter_polling(&shutdown, &handle));

        let readiness = controller.readiness();
        assert_eq!(readiness.state, ReadinessState::Polling);
        assert!(readiness.note.unwrap().contains("launch-1"));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let controller = LifecycleController::new(&Config::default()).unwrap();
        assert!(!controller.shutdown().await);
        assert!(!controller.shutdown().await);
    }
}
