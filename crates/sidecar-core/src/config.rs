//! Configuration resolution for the sidecar host.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/sidecar-host/settings.json`)
//! 3. Project config (`.sidecar/settings.json`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)
//!
//! Files are merged key by key, so a project file that only sets
//! `health.base_url` keeps every other value from the layers below it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete sidecar host configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub sidecar: SidecarConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub action: ActionConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// How to launch the worker process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SidecarConfig {
    /// Worker executable (absolute path or resolved through `PATH`).
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    /// Line written to the worker's stdin to request a clean exit.
    /// `None` skips straight to closing stdin.
    pub shutdown_command: Option<String>,
    /// Seconds to wait for the worker to exit before killing it.
    pub terminate_timeout_secs: u64,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("main"),
            args: Vec::new(),
            working_directory: None,
            shutdown_command: Some("sidecar shutdown".to_string()),
            terminate_timeout_secs: 5,
        }
    }
}

impl SidecarConfig {
    pub const fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }
}

/// Readiness polling against the worker's health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealthConfig {
    /// Base URL of the worker's HTTP interface, shared with the action endpoint.
    pub base_url: String,
    pub path: String,
    pub interval_ms: u64,
    pub max_attempts: u32,
    /// Upper bound for a single probe round-trip.
    pub probe_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8008".to_string(),
            path: "/health".to_string(),
            interval_ms: 1_000,
            max_attempts: 30,
            probe_timeout_ms: 2_000,
        }
    }
}

impl HealthConfig {
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// The single on-demand action exposed by the worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ActionConfig {
    pub path: String,
    pub request_timeout_secs: u64,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            path: "/optimize".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl ActionConfig {
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Host logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let global = global_config_path();
    let project = project_dir.map(project_config_path);
    let mut config = load_layers(global.as_deref(), project.as_deref())?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Merge the file layers on top of the defaults, skipping files that do not exist.
pub fn load_layers(global: Option<&Path>, project: Option<&Path>) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    for path in [global, project].into_iter().flatten() {
        if path.exists() {
            let overlay = read_config_value(path)?;
            merge_values(&mut merged, overlay);
        }
    }

    serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid merged configuration: {e}")))
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("sidecar-host").join("settings.json"))
}

/// Project config file path inside `dir`.
pub fn project_config_path(dir: &Path) -> PathBuf {
    dir.join(".sidecar").join("settings.json")
}

fn read_config_value(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;
    if !value.is_object() {
        return Err(Error::Config(format!(
            "Config file {} must contain a JSON object",
            path.display()
        )));
    }
    Ok(value)
}

/// Recursively merge `overlay` into `base`; objects merge per key, anything else replaces.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn apply_env_overrides(config: &mut Config) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Apply `SIDECAR_*` overrides using `lookup` as the variable source.
///
/// Values that fail to parse are ignored and the lower layer wins.
pub fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("SIDECAR_PROGRAM") {
        config.sidecar.program = PathBuf::from(val);
    }
    if let Some(val) = lookup("SIDECAR_BASE_URL") {
        config.health.base_url = val;
    }
    if let Some(n) = lookup("SIDECAR_HEALTH_INTERVAL_MS").and_then(|v| v.parse().ok()) {
        config.health.interval_ms = n;
    }
    if let Some(n) = lookup("SIDECAR_HEALTH_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
        config.health.max_attempts = n;
    }
    if let Some(val) = lookup("SIDECAR_LOG_LEVEL") {
        config.log.level = val;
    }
}
