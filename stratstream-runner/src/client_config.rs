//! Connection settings for the backtest service.
//!
//! Loaded from TOML (every key optional) and overridable from the
//! environment:
//!
//! ```toml
//! base_url = "http://backtest.internal:8000"
//! connect_timeout_secs = 5
//! idle_timeout_secs = 300
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use stratstream_core::ConfigError;

/// Environment variable overriding `base_url`.
pub const API_URL_ENV: &str = "STRATSTREAM_API_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub base_url: String,
    pub stream_path: String,
    pub cancel_path: String,
    pub connect_timeout_secs: u64,
    /// Longest the stream may go without sending a byte before the run
    /// fails. `None` waits for as long as the server keeps the connection
    /// open.
    pub idle_timeout_secs: Option<u64>,
    pub cancel_timeout_secs: u64,
    /// Read buffer size for the decode loop, in bytes.
    pub chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            stream_path: "/api/backtest/stream".into(),
            cancel_path: "/api/backtest/cancel".into(),
            connect_timeout_secs: 10,
            idle_timeout_secs: None,
            cancel_timeout_secs: 10,
            chunk_size: 8 * 1024,
        }
    }
}

impl ClientConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `STRATSTREAM_API_URL` if it is set and non-empty.
    pub fn with_env_overrides(self) -> Self {
        self.with_base_url_override(std::env::var(API_URL_ENV).ok())
    }

    fn with_base_url_override(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.base_url = url.trim().to_string();
        }
        self
    }

    pub fn stream_url(&self) -> String {
        join_url(&self.base_url, &self.stream_path)
    }

    pub fn cancel_url(&self) -> String {
        join_url(&self.base_url, &self.cancel_path)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_secs(self.cancel_timeout_secs)
    }

    /// Chunk size with a floor, so a zero in the config cannot stall reads.
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(256)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
