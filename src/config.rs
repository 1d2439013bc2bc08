//! Client and retry configuration.
//!
//! Both structs deserialize with every field optional, so a partial JSON document
//! only overrides what it names.
//!
//! ```
//! use docdb_direct::ClientConfig;
//!
//! let config = ClientConfig::from_json(r#"{"retry": {"max_throttle_retries": 3}}"#).unwrap();
//! assert_eq!(config.retry.max_throttle_retries, 3);
//! assert_eq!(config.retry.max_gone_retries, 3);
//! assert!(config.enable_logging);
//! ```

use crate::protocol::constants::DEFAULT_RETRY_AFTER_MS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`RequestPipeline`](crate::RequestPipeline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-attempt timeout applied by [`HttpTransport`](crate::HttpTransport)
    pub request_timeout_ms: u64,
    /// Emit retry warnings
    pub enable_logging: bool,
    /// Retry bounds
    pub retry: RetryOptions,
}

impl ClientConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// `request_timeout_ms` as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 60_000,
            enable_logging: true,
            retry: RetryOptions::default(),
        }
    }
}

/// Bounds for the [`RetryPolicy`](crate::RetryPolicy).
///
/// Attempt bounds count retries: with `max_gone_retries = 3` a request is sent at most
/// four times when every attempt returns 410.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Retries allowed for 429 responses
    pub max_throttle_retries: u32,
    /// Elapsed-time budget for 429 responses
    pub max_throttle_wait_ms: u64,
    /// Backoff floor for 429 responses without a retry-after header
    pub default_retry_after_ms: u64,
    /// Retries allowed for 410 / 449 responses
    pub max_gone_retries: u32,
    /// Base backoff before retrying after a routing refresh
    pub gone_backoff_ms: u64,
    /// Retries allowed for 503 / 408 / transport failures
    pub max_transient_retries: u32,
    /// Elapsed-time budget for 503 / 408 / transport failures
    pub transient_time_budget_ms: u64,
    /// Routing refreshes allowed once every replica of a range failed transiently
    pub max_routing_refreshes: u32,
    /// Upper bound on any computed backoff
    pub max_backoff_ms: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_throttle_retries: 9,
            max_throttle_wait_ms: 30_000,
            default_retry_after_ms: DEFAULT_RETRY_AFTER_MS,
            max_gone_retries: 3,
            gone_backoff_ms: 50,
            max_transient_retries: 3,
            transient_time_budget_ms: 30_000,
            max_routing_refreshes: 1,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryOptions {
    pub(crate) fn max_throttle_wait(&self) -> Duration {
        Duration::from_millis(self.max_throttle_wait_ms)
    }

    pub(crate) fn transient_time_budget(&self) -> Duration {
        Duration::from_millis(self.transient_time_budget_ms)
    }

    pub(crate) fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}
