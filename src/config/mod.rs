//! # Handler Configuration
//!
//! Worker-wide settings of the dispatcher, loaded in layers:
//!
//! 1. Built-in defaults ([`HandlerConfig::default`])
//! 2. An optional TOML/YAML/JSON file (`EXTASK_CONFIG_PATH` or an explicit path)
//! 3. Environment variables prefixed `EXTASK__`, e.g. `EXTASK__WORKER_ID`
//!
//! Later layers override earlier ones. The result is validated before use.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use external_task_handler::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let lock_timeout = manager.config().default_lock_timeout();
//! # let _ = lock_timeout;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::{defaults, DEFAULT_RESPONSE_TIMEOUT_MESSAGE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Settings shared by every registration of one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Identity presented to the engine when leasing and completing tasks
    pub worker_id: String,
    pub default_lock_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub sweep_on_startup: bool,
    /// Upper bound on processing actions running at once
    pub max_concurrent_processing: usize,
    /// Restrict fetch-and-lock to the registration's process definition key
    pub lease_per_definition_key: bool,
    /// Delay used when a retryable failure comes without a backoff sequence
    pub default_retry_delay_ms: u64,
    pub default_response_timeout_message: String,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            default_lock_timeout_ms: defaults::LOCK_TIMEOUT.as_millis() as u64,
            sweep_interval_ms: defaults::SWEEP_INTERVAL.as_millis() as u64,
            sweep_on_startup: true,
            max_concurrent_processing: defaults::MAX_CONCURRENT_PROCESSING,
            lease_per_definition_key: true,
            default_retry_delay_ms: defaults::RETRY_DELAY.as_millis() as u64,
            default_response_timeout_message: DEFAULT_RESPONSE_TIMEOUT_MESSAGE.to_string(),
        }
    }
}

impl HandlerConfig {
    pub fn default_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.default_lock_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn default_retry_delay(&self) -> Duration {
        Duration::from_millis(self.default_retry_delay_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.worker_id.trim().is_empty() {
            return Err(ConfigurationError::invalid("worker_id", "must not be empty"));
        }
        if self.default_lock_timeout_ms == 0 {
            return Err(ConfigurationError::invalid(
                "default_lock_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigurationError::invalid(
                "sweep_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.max_concurrent_processing == 0 {
            return Err(ConfigurationError::invalid(
                "max_concurrent_processing",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// `{hostname}-{uuid}`, falling back to a fixed prefix when no hostname is set
pub fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| defaults::WORKER_ID_PREFIX.to_string());
    format!("{host}-{}", Uuid::new_v4())
}
