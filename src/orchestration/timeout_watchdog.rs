//! # Response Timeout Watchdog
//!
//! A watchdog job is scheduled with the engine when an async request returns
//! and a response timeout applies. Its payload identifies the task and the lock
//! expiry the task had at that moment, in the canonical form
//! `{externalTaskId}#{lockExpiryEpochMillis}`.
//!
//! When the job comes due the task is queried again and left alone if
//!
//! - it no longer exists (the response arrived, or it was never leased),
//! - its lock expiry differs from the captured one (it was re-leased), or
//! - the captured lock has already expired (the watchdog is stale).
//!
//! Otherwise a terminal failure with the registration's timeout message is
//! reported. The lock is not revoked, so a late response still completes the
//! task.

use super::ExternalTaskDispatcher;
use crate::constants::{operations, KEY_SEPARATOR};
use crate::engine::{EngineError, FailureReport};
use crate::registry::ProcessingContract;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("Malformed watchdog payload '{0}'")]
    Malformed(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// What a fired watchdog did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogVerdict {
    /// A timeout incident was reported
    Fired,
    /// The task is gone or not leased by anyone
    TaskGone,
    /// The task was leased again since the watchdog was armed
    Released,
    /// The lease the watchdog guarded has already run out
    Stale,
}

/// Payload of a response-timeout job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogJob {
    pub external_task_id: String,
    /// Lock expiry of the task when the request returned, millisecond precision
    pub lock_expiration: DateTime<Utc>,
}

impl WatchdogJob {
    pub fn new(external_task_id: impl Into<String>, lock_expiration: DateTime<Utc>) -> Self {
        Self {
            external_task_id: external_task_id.into(),
            lock_expiration,
        }
    }

    /// Whether `current` is the lock this watchdog was armed for
    pub fn guards_lock(&self, current: DateTime<Utc>) -> bool {
        current.timestamp_millis() == self.lock_expiration.timestamp_millis()
    }
}

impl fmt::Display for WatchdogJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.external_task_id,
            KEY_SEPARATOR,
            self.lock_expiration.timestamp_millis()
        )
    }
}

impl FromStr for WatchdogJob {
    type Err = WatchdogError;

    fn from_str(configuration: &str) -> Result<Self, Self::Err> {
        let malformed = || WatchdogError::Malformed(configuration.to_string());

        let (task_id, millis) = configuration.rsplit_once(KEY_SEPARATOR).ok_or_else(malformed)?;
        if task_id.is_empty() {
            return Err(malformed());
        }
        let millis: i64 = millis.parse().map_err(|_| malformed())?;
        let lock_expiration = DateTime::from_timestamp_millis(millis).ok_or_else(malformed)?;

        Ok(Self::new(task_id, lock_expiration))
    }
}

impl ExternalTaskDispatcher {
    /// Handle a due watchdog job
    pub async fn fire_watchdog(&self, configuration: &str) -> Result<WatchdogVerdict, WatchdogError> {
        let job: WatchdogJob = configuration.parse()?;
        let verdict = self.check_and_fire(&job).await?;
        self.inner.stats
            .record_watchdog(verdict == WatchdogVerdict::Fired);
        Ok(verdict)
    }

    async fn check_and_fire(&self, job: &WatchdogJob) -> Result<WatchdogVerdict, WatchdogError> {
        let Some(task) = self.inner.engine.find_task(&job.external_task_id).await? else {
            debug!(external_task_id = %job.external_task_id, "⏰ WATCHDOG: Task gone");
            return Ok(WatchdogVerdict::TaskGone);
        };

        let Some(current) = task.lock_expiration.filter(|_| task.is_locked()) else {
            return Ok(WatchdogVerdict::TaskGone);
        };

        if !job.guards_lock(current) {
            debug!(
                external_task_id = %task.id,
                captured = %job.lock_expiration,
                current = %current,
                "⏰ WATCHDOG: Task re-leased since the request"
            );
            return Ok(WatchdogVerdict::Released);
        }

        if current <= Utc::now() {
            debug!(external_task_id = %task.id, "⏰ WATCHDOG: Lease already expired");
            return Ok(WatchdogVerdict::Stale);
        }

        let (default_message, worker_id) = {
            let config = self.inner.config.read();
            (config.default_response_timeout_message.clone(), config.worker_id.clone())
        };
        let message = match self
            .inner
            .registry
            .lookup(&task.process_definition_key, &task.topic)
            .map(|registration| registration.contract.clone())
        {
            Some(ProcessingContract::Async {
                response_timeout_message: Some(custom),
                ..
            }) => custom,
            _ => default_message,
        };

        warn!(
            operation = operations::TIMEOUT_WATCHDOG,
            external_task_id = %task.id,
            process_instance_id = %task.process_instance_id,
            "⏰ WATCHDOG: No response before the timeout"
        );

        let details = format!(
            "No response received for external task {} (activity {}) while locked until {}",
            task.id, task.activity_id, job.lock_expiration
        );
        self.inner.engine
            .handle_failure(&task.id, &worker_id, FailureReport::terminal(message, details))
            .await?;

        Ok(WatchdogVerdict::Fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_form() {
        let expiry = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let job = WatchdogJob::new("task-1", expiry);
        assert_eq!(job.to_string(), "task-1#1700000000123");
        assert_eq!("task-1#1700000000123".parse::<WatchdogJob>().unwrap(), job);
    }

    #[test]
    fn test_task_ids_containing_separator_survive() {
        let expiry = DateTime::from_timestamp_millis(42).unwrap();
        let job = WatchdogJob::new("a#b", expiry);
        let parsed: WatchdogJob = job.to_string().parse().unwrap();
        assert_eq!(parsed.external_task_id, "a#b");
    }

    #[test]
    fn test_malformed_payloads_rejected() {
        for payload in ["", "no-separator", "#123", "task#", "task#abc"] {
            assert!(
                matches!(payload.parse::<WatchdogJob>(), Err(WatchdogError::Malformed(_))),
                "payload {payload:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_lock_comparison_at_millisecond_precision() {
        let captured = DateTime::from_timestamp_millis(1_000).unwrap();
        let job = WatchdogJob::new("t", captured);

        let same_millisecond = captured + chrono::Duration::microseconds(400);
        assert!(job.guards_lock(same_millisecond));
        assert!(!job.guards_lock(captured + chrono::Duration::milliseconds(1)));
    }
}
