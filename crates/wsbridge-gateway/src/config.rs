//! Validated bridge configuration

use std::time::Duration;

use axum::http::Uri;

use crate::error::BridgeError;

/// Scheme used to reach the backend.
pub const BACKEND_SCHEME: &str = "ws";

/// Default interval between liveness probes.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15);

/// Immutable bridge configuration.
///
/// Only obtainable through [`BridgeConfig::new`], so a constructed value
/// always has a positive interval, a backend host and at least one path.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    interval: Duration,
    backend_host: String,
    backend_paths: Vec<String>,
}

impl BridgeConfig {
    pub fn new(
        interval: Duration,
        backend_host: impl Into<String>,
        backend_paths: Vec<String>,
    ) -> Result<Self, BridgeError> {
        let backend_host = backend_host.into();
        if interval.is_zero() {
            return Err(BridgeError::InvalidConfig(format!(
                "invalid interval: {:?}",
                interval
            )));
        }
        if backend_host.trim().is_empty() {
            return Err(BridgeError::InvalidConfig(
                "backend host (first value) must be specified".to_string(),
            ));
        }
        if backend_paths.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "backend paths (second value and onwards) must have at least one entry"
                    .to_string(),
            ));
        }
        if let Some(bad) = backend_paths.iter().find(|p| !p.starts_with('/')) {
            return Err(BridgeError::InvalidConfig(format!(
                "backend path must start with '/': {}",
                bad
            )));
        }

        tracing::debug!(
            interval = ?interval,
            backend_host = %backend_host,
            backend_paths = ?backend_paths,
            "bridge provisioned"
        );

        Ok(Self {
            interval,
            backend_host,
            backend_paths,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn backend_host(&self) -> &str {
        &self.backend_host
    }

    pub fn backend_paths(&self) -> &[String] {
        &self.backend_paths
    }

    /// Exact match against the allow-list.
    pub fn allows(&self, path: &str) -> bool {
        self.backend_paths.iter().any(|p| p == path)
    }

    /// `ws://<backend_host><path?query>` for an inbound request URI.
    pub fn backend_url(&self, uri: &Uri) -> String {
        let path_and_query = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("{}://{}{}", BACKEND_SCHEME, self.backend_host, path_and_query)
    }
}
