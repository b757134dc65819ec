//! Worker HTTP addressing.

use crate::error::CoordinatorError;

/// Base address of the worker's HTTP interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEndpoint {
    base_url: String,
}

impl WorkerEndpoint {
    /// Validate and normalise a base URL such as `http://localhost:8008/`.
    pub fn parse(base_url: &str) -> Result<Self, CoordinatorError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(CoordinatorError::Config("worker base_url is empty".into()));
        }
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(CoordinatorError::Config(format!(
                "worker base_url must start with http:// or https://, got {trimmed}"
            )));
        }
        Ok(Self {
            base_url: trimmed.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Join a path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}
