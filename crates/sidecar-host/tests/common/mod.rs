//! Shared fixtures: a fake worker HTTP server and coordinator configs.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use sidecar_core::Config;
use sidecar_host::{LifecycleController, Readiness};
use tokio::task::JoinHandle;

/// How the fake worker answers `/optimize`.
#[derive(Debug, Clone)]
pub enum ActionReply {
    /// 200 with `{"message": ...}`.
    Message(String),
    /// Bare status code with a plain-text body.
    Status(u16, String),
    /// 200 with a body that is not JSON.
    Garbage,
}

struct Shared {
    /// Health turns 200 from this probe on; never when `None`.
    healthy_after: Option<u32>,
    reply: ActionReply,
    health_calls: AtomicU32,
    action_calls: AtomicU32,
    last_action: Mutex<Option<Value>>,
}

/// In-process stand-in for the worker's HTTP interface.
pub struct FakeWorker {
    pub base_url: String,
    shared: Arc<Shared>,
    server: JoinHandle<()>,
}

impl FakeWorker {
    pub async fn start(healthy_after: Option<u32>, reply: ActionReply) -> Self {
        let shared = Arc::new(Shared {
            healthy_after,
            reply,
            health_calls: AtomicU32::new(0),
            action_calls: AtomicU32::new(0),
            last_action: Mutex::new(None),
        });
        let router = Router::new()
            .route("/health", get(health))
            .route("/optimize", post(optimize))
            .with_state(Arc::clone(&shared));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            shared,
            server,
        }
    }

    /// Healthy on the first probe, answers actions with `message`.
    pub async fn healthy(message: &str) -> Self {
        Self::start(Some(1), ActionReply::Message(message.to_string())).await
    }

    pub fn health_calls(&self) -> u32 {
        self.shared.health_calls.load(Ordering::SeqCst)
    }

    pub fn action_calls(&self) -> u32 {
        self.shared.action_calls.load(Ordering::SeqCst)
    }

    pub fn last_action(&self) -> Option<Value> {
        self.shared.last_action.lock().unwrap().clone()
    }

    /// Stop accepting connections.
    pub async fn stop(self) {
        self.server.abort();
        let _ = self.server.await;
    }
}

async fn health(State(shared): State<Arc<Shared>>) -> StatusCode {
    let n = shared.health_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if shared.healthy_after.is_some_and(|after| n >= after) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn optimize(State(shared): State<Arc<Shared>>, Json(body): Json<Value>) -> Response {
    shared.action_calls.fetch_add(1, Ordering::SeqCst);
    *shared.last_action.lock().unwrap() = Some(body);
    match &shared.reply {
        ActionReply::Message(message) => Json(json!({ "message": message })).into_response(),
        ActionReply::Status(code, body) => (
            StatusCode::from_u16(*code).unwrap(),
            body.clone(),
        )
            .into_response(),
        ActionReply::Garbage => (StatusCode::OK, "definitely not json").into_response(),
    }
}

/// Shell worker that prints a banner on each stream, then waits for a stdin
/// line and says goodbye.
pub const WORKER_SCRIPT: &str = r#"echo "[Sidecar] Starting server"
echo "warming up" >&2
read line
echo "[Sidecar] Shutting down... ($line)"
"#;

/// Config running `sh -c <script>` against `base_url`, polling fast.
pub fn sh_config(script: &str, base_url: &str) -> Config {
    let mut config = Config::default();
    config.sidecar.program = "sh".into();
    config.sidecar.args = vec!["-c".to_string(), script.to_string()];
    config.sidecar.terminate_timeout_secs = 2;
    config.health.base_url = base_url.to_string();
    config.health.interval_ms = 20;
    config.health.max_attempts = 50;
    config.health.probe_timeout_ms = 500;
    config.action.request_timeout_secs = 5;
    config
}

pub async fn settle(controller: &LifecycleController) -> Readiness {
    tokio::time::timeout(Duration::from_secs(10), controller.wait_settled())
        .await
        .expect("coordinator did not settle")
}
