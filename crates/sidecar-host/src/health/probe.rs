//! Readiness probes.

use std::future::Future;
use std::time::Duration;

use tracing::trace;

/// A single readiness check against the worker.
pub trait Probe: Send + Sync {
    /// `true` only when the worker confirmed it is healthy. Transport errors
    /// and unhealthy responses are both just `false`.
    fn check(&self) -> impl Future<Output = bool> + Send;
}

/// Probes `GET <url>`; any 2xx status counts as healthy.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    http: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: crate::http::worker_client(timeout)?,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Probe for HttpProbe {
    async fn check(&self) -> bool {
        match self.http.get(&self.url).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                trace!(url = %self.url, status = %resp.status(), "Health probe not ready");
                false
            }
            Err(e) => {
                trace!(url = %self.url, error = %e, "Health probe transport error");
                false
            }
        }
    }
}
