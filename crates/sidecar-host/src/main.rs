//! Sidecar Host
//!
//! Headless host for the sidecar worker: launches it, mirrors its output,
//! waits for it to become healthy and optionally runs the cleanup action.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use sidecar_core::Config;
use sidecar_core::tracing_init::{default_filter, init_tracing};
use sidecar_host::{
    ActionGateway, ActionRequest, LifecycleController, ReadinessState, StreamFilter,
};

#[derive(Parser, Debug)]
#[command(name = "sidecar-host")]
#[command(version, about = "Sidecar host - worker lifecycle and readiness-gated actions")]
struct Args {
    /// Directory containing `.sidecar/settings.json`
    #[arg(long, env = "SIDECAR_PROJECT_DIR")]
    project_dir: Option<PathBuf>,

    /// Worker executable
    #[arg(long)]
    program: Option<PathBuf>,

    /// Base URL of the worker's HTTP interface
    #[arg(long)]
    base_url: Option<String>,

    /// Milliseconds between health probes
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Health probe budget
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Run the cleanup action on this folder once the worker is ready
    #[arg(long)]
    folder: Option<String>,

    /// Exit after the worker settles (and the action, if any) instead of
    /// waiting for Ctrl+C
    #[arg(long)]
    once: bool,

    /// Arguments passed to the worker (after `--`)
    #[arg(last = true)]
    worker_args: Vec<String>,
}

impl Args {
    /// CLI flags are the highest-priority configuration layer.
    fn apply(&self, config: &mut Config) {
        if let Some(program) = &self.program {
            config.sidecar.program.clone_from(program);
        }
        if !self.worker_args.is_empty() {
            config.sidecar.args.clone_from(&self.worker_args);
        }
        if let Some(url) = &self.base_url {
            config.health.base_url.clone_from(url);
        }
        if let Some(ms) = self.interval_ms {
            config.health.interval_ms = ms;
        }
        if let Some(n) = self.max_attempts {
            config.health.max_attempts = n;
        }
        if let Some(level) = &self.log_level {
            config.log.level.clone_from(level);
        }
        if self.log_json {
            config.log.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = sidecar_core::config::load_config(args.project_dir.as_deref())?;
    args.apply(&mut config);

    init_tracing(
        &default_filter("sidecar_host", &config.log.level),
        config.log.json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        program = %config.sidecar.program.display(),
        base_url = %config.health.base_url,
        "Starting sidecar-host"
    );

    let controller = LifecycleController::new(&config)?;
    let gateway = ActionGateway::new(controller.clone(), &config.action)?;

    // Subscribe before start so the worker's first lines are shown.
    let console = spawn_console(&controller);
    controller.start();

    let result = run(&controller, &gateway, &args).await;

    controller.shutdown().await;
    let _ = console.await;

    info!("Sidecar host stopped");
    result
}

async fn run(
    controller: &LifecycleController,
    gateway: &ActionGateway,
    args: &Args,
) -> anyhow::Result<()> {
    let settled = tokio::select! {
        readiness = controller.wait_settled() => readiness,
        () = shutdown_signal() => return Ok(()),
    };

    if settled.state == ReadinessState::Ready {
        if let Some(folder) = &args.folder {
            report_action(gateway, folder).await;
        }
    } else {
        let note = settled.note.unwrap_or_default();
        error!(state = %settled.state, %note, "Sidecar did not become ready");
        if args.once {
            anyhow::bail!("sidecar did not become ready ({}): {note}", settled.state);
        }
    }

    if !args.once {
        shutdown_signal().await;
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
async fn report_action(gateway: &ActionGateway, folder: &str) {
    match gateway.invoke(&ActionRequest::folder(folder)).await {
        Ok(result) => println!("Result: {}", result.message),
        Err(e) => println!("Error: {e}"),
    }
}

/// Print worker output and readiness changes until the relay closes.
#[allow(clippy::print_stdout)]
fn spawn_console(controller: &LifecycleController) -> tokio::task::JoinHandle<()> {
    let mut logs = controller.subscribe_logs(StreamFilter::All);
    let mut states = controller.subscribe_state();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                line = logs.next() => match line {
                    Some(line) => println!("[{}] {}", line.stream.channel(), line.text),
                    None => break,
                },
                Ok(change) = states.recv() => match change.note {
                    Some(note) => println!("[state] {}: {note}", change.to),
                    None => println!("[state] {}", change.to),
                },
            }
        }
    })
}

/// Resolve on Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C shutdown signal"),
        () = sigterm => info!("Received SIGTERM shutdown signal"),
    }
}
