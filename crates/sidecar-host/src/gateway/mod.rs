//! Readiness-gated forwarding of the user action to the worker.
//!
//! The gateway reads readiness but never changes it: a failed action leaves
//! the worker `Ready`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sidecar_core::ActionConfig;
use tracing::{debug, info, warn};

use crate::error::CoordinatorError;
use crate::lifecycle::{LifecycleController, ReadinessState};

/// Free-form JSON object sent as the action's request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionRequest(Map<String, Value>);

impl ActionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// `{"folder": <name>}`, the worker's cleanup request.
    pub fn folder(name: impl Into<String>) -> Self {
        Self::new().with("folder", name.into())
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// Successful action response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub message: String,
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// Rejected locally; nothing was sent.
    #[error("Backend is not yet ready (state: {state})")]
    NotReady { state: ReadinessState },

    #[error("Request to backend failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP error! status: {status}")]
    Protocol { status: u16, body: String },

    #[error("Invalid response from backend: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Sends [`ActionRequest`]s to the worker once it is ready.
#[derive(Clone)]
pub struct ActionGateway {
    controller: LifecycleController,
    http: reqwest::Client,
    url: String,
}

impl ActionGateway {
    pub fn new(
        controller: LifecycleController,
        config: &ActionConfig,
    ) -> Result<Self, CoordinatorError> {
        let url = controller.endpoint().url(&config.path);
        let http = crate::http::worker_client(config.request_timeout())?;
        Ok(Self {
            controller,
            http,
            url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Forward `request` to the worker.
    ///
    /// Fails with [`ActionError::NotReady`] without touching the network
    /// unless readiness is exactly `Ready`.
    pub async fn invoke(&self, request: &ActionRequest) -> Result<ActionResult, ActionError> {
        let state = self.controller.state();
        if state != ReadinessState::Ready {
            debug!(%state, "Action rejected, backend not ready");
            return Err(ActionError::NotReady { state });
        }

        info!(url = %self.url, "Sending action to backend");
        let resp = self.http.post(&self.url).json(request).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(url = %self.url, %status, "Backend rejected action");
            return Err(ActionError::Protocol {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await?;
        let result: ActionResult = serde_json::from_slice(&bytes)?;
        debug!(message = %result.message, "Action completed");
        Ok(result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sidecar_core::Config;

    #[test]
    fn folder_request_body() {
        let request = ActionRequest::folder("Downloads");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"folder": "Downloads"})
        );
        assert_eq!(request.get("folder").and_then(Value::as_str), Some("Downloads"));
    }

    #[test]
    fn extra_fields_kept() {
        let request = ActionRequest::folder("Desktop").with("dry_run", true);
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"folder": "Desktop", "dry_run": true})
        );
    }

    #[test]
    fn result_ignores_unknown_fields() {
        let result: ActionResult =
            serde_json::from_str(r#"{"message": "Moved 3 files", "took_ms": 12}"#).unwrap();
        assert_eq!(result.to_string(), "Moved 3 files");
    }

    #[test]
    fn not_ready_message_names_state() {
        let err = ActionError::NotReady {
            state: ReadinessState::Polling,
        };
        assert_eq!(err.to_string(), "Backend is not yet ready (state: polling)");
    }

    #[test]
    fn url_joins_base_and_path() {
        let controller = LifecycleController::new(&Config::default()).unwrap();
        let gateway = ActionGateway::new(controller, &ActionConfig::default()).unwrap();
        assert_eq!(gateway.url(), "http://localhost:8008/optimize");
    }

    #[tokio::test]
    async fn uninitialized_is_not_ready() {
        let controller = LifecycleController::new(&Config::default()).unwrap();
        let gateway = ActionGateway::new(controller, &ActionConfig::default()).unwrap();

        let err = gateway
            .invoke(&ActionRequest::folder("Downloads"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ActionError::NotReady {
                state: ReadinessState::Uninitialized
            }
        ));
    }
}
