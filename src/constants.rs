//! # System Constants
//!
//! Defaults and well-known identifiers shared across the dispatch engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Separator used when rendering a `(process definition key, topic)` pair as a
/// single string. Keys and topics containing it are rejected at registration.
pub const KEY_SEPARATOR: char = '#';

/// Job handler type under which async response timeouts are scheduled with the engine.
pub const ASYNC_TIMEOUT_JOB_TYPE: &str = "async-response-timeout";

/// Incident message used when an async registration did not configure one.
pub const DEFAULT_RESPONSE_TIMEOUT_MESSAGE: &str = "Response timeout expired";

/// Batch size passed to fetch-and-lock; effectively unbounded.
pub const UNBOUNDED_FETCH_SIZE: usize = i32::MAX as usize;

/// Engine-facing defaults
pub mod defaults {
    use super::Duration;

    pub const LOCK_TIMEOUT: Duration = Duration::from_secs(60);
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
    pub const RETRY_DELAY: Duration = Duration::from_secs(5);
    pub const MAX_CONCURRENT_PROCESSING: usize = 16;
    pub const WORKER_ID_PREFIX: &str = "worker";
}

/// Canonical operation names used in structured log records
pub mod operations {
    pub const REGISTER: &str = "register";
    pub const ACTIVITY_STARTED: &str = "activity_started";
    pub const FETCH_AND_LOCK: &str = "fetch_and_lock";
    pub const SWEEP: &str = "sweep";
    pub const PROCESS: &str = "process";
    pub const COMPLETE: &str = "complete";
    pub const BUSINESS_ERROR: &str = "business_error";
    pub const RETRY: &str = "retry";
    pub const INCIDENT: &str = "incident";
    pub const ASYNC_REQUEST: &str = "async_request";
    pub const ASYNC_RESPONSE: &str = "async_response";
    pub const TIMEOUT_WATCHDOG: &str = "timeout_watchdog";
}

/// Final outcome of one processing attempt, as reported back to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Completed,
    BusinessError,
    RetryScheduled,
    Incident,
    AwaitingResponse,
}

impl std::fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchOutcome::Completed => write!(f, "completed"),
            DispatchOutcome::BusinessError => write!(f, "business_error"),
            DispatchOutcome::RetryScheduled => write!(f, "retry_scheduled"),
            DispatchOutcome::Incident => write!(f, "incident"),
            DispatchOutcome::AwaitingResponse => write!(f, "awaiting_response"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_outcome_serialization() {
        let json = serde_json::to_string(&DispatchOutcome::RetryScheduled).unwrap();
        assert_eq!(json, "\"retry_scheduled\"");
        assert_eq!(DispatchOutcome::Incident.to_string(), "incident");
    }

    #[test]
    fn test_defaults() {
        assert_eq!(defaults::LOCK_TIMEOUT, Duration::from_secs(60));
        assert_eq!(defaults::RETRY_DELAY, Duration::from_millis(5000));
        assert!(UNBOUNDED_FETCH_SIZE > 1_000_000);
    }
}
