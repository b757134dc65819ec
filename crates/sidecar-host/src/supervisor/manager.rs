//! Sidecar worker lifecycle manager.
//!
//! Owns the single worker process: spawning it, wiring its output streams
//! into the [`LogRelay`], forwarding stdin commands, and shutting it down.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use sidecar_core::SidecarConfig;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::relay::{LogRelay, LogStream};

/// How long `stop()` waits for the output readers to drain after exit.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for spawning the worker.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Executable to run.
    pub program: PathBuf,
    /// Command-line arguments.
    pub args: Vec<String>,
    /// Working directory (inherits the host's when `None`).
    pub working_directory: Option<PathBuf>,
    /// Line written to stdin to ask the worker to exit.
    pub shutdown_command: Option<String>,
    /// Grace period before the worker is killed.
    pub terminate_timeout: Duration,
}

impl SpawnConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::from(&SidecarConfig::default())
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_shutdown_command(mut self, command: Option<String>) -> Self {
        self.shutdown_command = command;
        self
    }

    #[must_use]
    pub const fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }
}

impl From<&SidecarConfig> for SpawnConfig {
    fn from(config: &SidecarConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            working_directory: config.working_directory.clone(),
            shutdown_command: config.shutdown_command.clone(),
            terminate_timeout: config.terminate_timeout(),
        }
    }
}

/// Handle to the running worker.
///
/// Only identifies the process; the [`Child`] itself stays inside the
/// supervisor so nothing else can kill or wait on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    /// Unique identifier for this launch.
    pub id: String,
    /// OS process id, if the platform reported one.
    pub pid: Option<u32>,
}

struct RunningProcess {
    handle: ProcessHandle,
    child: Child,
    stdin_tx: Option<mpsc::Sender<String>>,
    /// Completes once both output readers hit EOF.
    output_task: JoinHandle<()>,
}

/// Launches and owns the single worker subprocess.
pub struct ProcessSupervisor {
    config: SpawnConfig,
    relay: LogRelay,
    running: Mutex<Option<RunningProcess>>,
    stopped: AtomicBool,
    /// Set once the worker is found to have exited on its own.
    exited: AtomicBool,
    launches: AtomicUsize,
}

impl ProcessSupervisor {
    pub fn new(config: SpawnConfig, relay: LogRelay) -> Self {
        Self {
            config,
            relay,
            running: Mutex::new(None),
            stopped: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            launches: AtomicUsize::new(0),
        }
    }

    pub const fn config(&self) -> &SpawnConfig {
        &self.config
    }

    pub const fn relay(&self) -> &LogRelay {
        &self.relay
    }

    /// Spawn the worker, or return the existing handle if it is already running.
    pub async fn launch(&self) -> Result<ProcessHandle, SubprocessError> {
        let mut running = self.running.lock().await;
        self.reap_exited(&mut running);
        if let Some(process) = running.as_ref() {
            debug!(process_id = %process.handle.id, "Sidecar already running");
            return Ok(process.handle.clone());
        }
        if self.stopped.load(Ordering::Acquire) {
            return Err(SubprocessError::Stopped);
        }
        if self.exited.load(Ordering::Acquire) {
            return Err(SubprocessError::Exited);
        }

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_directory {
            cmd.current_dir(dir);
        }

        info!(
            program = %self.config.program.display(),
            args = ?self.config.args,
            "Spawning sidecar worker"
        );
        let mut child = cmd.spawn().map_err(|e| {
            error!(program = %self.config.program.display(), error = %e, "Failed to spawn sidecar");
            SubprocessError::SpawnFailed {
                program: self.config.program.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        self.launches.fetch_add(1, Ordering::AcqRel);

        let handle = ProcessHandle {
            id: uuid::Uuid::new_v4().to_string(),
            pid: child.id(),
        };

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.capture_failed("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.capture_failed("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| self.capture_failed("stderr"))?;

        let (stdin_tx, stdin_rx) = mpsc::channel::<String>(32);
        spawn_stdin_writer(stdin, stdin_rx, handle.id.clone());

        let out = spawn_reader(stdout, LogStream::Stdout, self.relay.clone(), handle.id.clone());
        let err = spawn_reader(stderr, LogStream::Stderr, self.relay.clone(), handle.id.clone());
        let relay = self.relay.clone();
        let output_task = tokio::spawn(async move {
            let _ = out.await;
            let _ = err.await;
            relay.close();
        });

        info!(process_id = %handle.id, pid = ?handle.pid, "Sidecar worker started");

        *running = Some(RunningProcess {
            handle: handle.clone(),
            child,
            stdin_tx: Some(stdin_tx),
            output_task,
        });
        drop(running);

        Ok(handle)
    }

    /// Drop the running entry if the worker has already exited.
    fn reap_exited(&self, running: &mut Option<RunningProcess>) {
        let Some(process) = running.as_mut() else {
            return;
        };
        match process.child.try_wait() {
            Ok(Some(status)) => {
                info!(process_id = %process.handle.id, ?status, "Sidecar exited on its own");
            }
            Ok(None) => return,
            Err(e) => {
                warn!(process_id = %process.handle.id, error = %e, "Failed to poll sidecar status");
                return;
            }
        }
        self.exited.store(true, Ordering::Release);
        // The output task still drains the pipes and closes the relay.
        *running = None;
    }

    fn capture_failed(&self, pipe: &str) -> SubprocessError {
        SubprocessError::SpawnFailed {
            program: self.config.program.display().to_string(),
            reason: format!("Failed to capture {pipe}"),
        }
    }

    /// Stop the worker and close the relay.
    ///
    /// Writes the shutdown command, closes stdin, waits up to the terminate
    /// timeout, then kills. Safe to call at any time, any number of times.
    /// Returns `true` if a worker was running.
    pub async fn stop(&self) -> bool {
        let process = {
            let mut running = self.running.lock().await;
            self.stopped.store(true, Ordering::Release);
            running.take()
        };

        let Some(mut process) = process else {
            self.relay.close();
            return false;
        };
        let process_id = process.handle.id.clone();
        debug!(process_id = %process_id, "Terminating sidecar worker");

        if let Some(stdin_tx) = process.stdin_tx.take() {
            if let Some(command) = &self.config.shutdown_command {
                let _ = stdin_tx.send(command.clone()).await;
            }
            // Dropping the sender closes stdin once queued lines are written.
            drop(stdin_tx);
        }

        match tokio::time::timeout(self.config.terminate_timeout, process.child.wait()).await {
            Ok(Ok(status)) => info!(process_id = %process_id, ?status, "Sidecar exited gracefully"),
            Ok(Err(e)) => {
                warn!(process_id = %process_id, error = %e, "Error waiting for sidecar, killing");
                process.child.kill().await.ok();
            }
            Err(_) => {
                warn!(process_id = %process_id, "Timeout waiting for sidecar shutdown, killing");
                process.child.kill().await.ok();
            }
        }

        if tokio::time::timeout(DRAIN_TIMEOUT, &mut process.output_task)
            .await
            .is_err()
        {
            debug!(process_id = %process_id, "Output readers still open after exit");
            process.output_task.abort();
        }
        self.relay.close();
        true
    }

    /// Write a line to the worker's stdin.
    pub async fn send_command(&self, line: &str) -> Result<(), SubprocessError> {
        let stdin_tx = {
            let mut running = self.running.lock().await;
            self.reap_exited(&mut running);
            running
                .as_ref()
                .and_then(|p| p.stdin_tx.clone())
                .ok_or(SubprocessError::ProcessNotRunning)?
        };
        stdin_tx
            .send(line.to_string())
            .await
            .map_err(|_| SubprocessError::StdinClosed)
    }

    /// Handle of the current worker, if launched and still alive.
    pub async fn handle(&self) -> Option<ProcessHandle> {
        let mut running = self.running.lock().await;
        self.reap_exited(&mut running);
        running.as_ref().map(|p| p.handle.clone())
    }

    /// Whether the worker is alive right now.
    pub async fn is_running(&self) -> bool {
        let mut running = self.running.lock().await;
        self.reap_exited(&mut running);
        running.is_some()
    }

    /// Number of processes actually spawned over this supervisor's lifetime.
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::Acquire)
    }
}

fn spawn_stdin_writer(
    mut stdin: tokio::process::ChildStdin,
    mut stdin_rx: mpsc::Receiver<String>,
    process_id: String,
) {
    tokio::spawn(async move {
        while let Some(line) = stdin_rx.recv().await {
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                debug!(process_id = %process_id, error = %e, "Failed to write to sidecar stdin");
                break;
            }
            if let Err(e) = stdin.write_all(b"\n").await {
                debug!(process_id = %process_id, error = %e, "Failed to write newline");
                break;
            }
            if let Err(e) = stdin.flush().await {
                debug!(process_id = %process_id, error = %e, "Failed to flush sidecar stdin");
                break;
            }
        }
    });
}

fn spawn_reader<R>(reader: R, stream: LogStream, relay: LogRelay, process_id: String) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = decode_line(&buf);
                    match stream {
                        LogStream::Stdout => debug!(process_id = %process_id, "stdout: {}", text),
                        LogStream::Stderr => warn!(process_id = %process_id, "stderr: {}", text),
                    }
                    relay.publish(stream, text);
                }
                Err(e) => {
                    warn!(process_id = %process_id, %stream, error = %e, "Failed to read sidecar output");
                    break;
                }
            }
        }
        debug!(process_id = %process_id, %stream, "Output reader finished");
    })
}

/// Lossy UTF-8 decode with the line terminator stripped.
fn decode_line(buf: &[u8]) -> String {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Errors from subprocess operations.
#[derive(Debug, thiserror::Error)]
pub enum SubprocessError {
    #[error("Failed to spawn sidecar {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Supervisor already stopped")]
    Stopped,

    /// The worker exited on its own; it is never respawned.
    #[error("Sidecar process already exited")]
    Exited,

    #[error("Sidecar process is not running")]
    ProcessNotRunning,

    #[error("Sidecar stdin closed")]
    StdinClosed,
}

/// The error `launch()` reports when the worker cannot be started.
pub type StartError = SubprocessError;
