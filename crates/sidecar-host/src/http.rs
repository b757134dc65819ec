//! Shared HTTP client construction for talking to the worker.

use std::time::Duration;

/// Build a client for the worker's local HTTP interface.
///
/// Proxies are bypassed: the worker always lives on this machine.
pub(crate) fn worker_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    // Ensure a TLS crypto provider is installed (reqwest uses rustls-no-provider).
    // The `Err` case just means it was already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    reqwest::Client::builder()
        .timeout(timeout)
        .no_proxy()
        .build()
}
