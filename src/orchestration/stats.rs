//! # Dispatch Statistics
//!
//! Lock-free counters updated on every dispatch. Snapshots are read counter
//! by counter and are not transactionally consistent, which is fine for
//! monitoring.

use crate::constants::DispatchOutcome;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of one dispatcher
#[derive(Debug, Default)]
pub struct DispatchStats {
    tasks_leased: AtomicU64,
    tasks_completed: AtomicU64,
    business_errors: AtomicU64,
    retries_scheduled: AtomicU64,
    incidents_raised: AtomicU64,
    async_requests_sent: AtomicU64,
    async_responses_handled: AtomicU64,
    watchdogs_fired: AtomicU64,
    watchdogs_skipped: AtomicU64,
    lease_failures: AtomicU64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_leased(&self, count: usize) {
        self.tasks_leased.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_lease_failure(&self) {
        self.lease_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count the outcome of one processing attempt
    pub fn record_outcome(&self, outcome: DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Completed => &self.tasks_completed,
            DispatchOutcome::BusinessError => &self.business_errors,
            DispatchOutcome::RetryScheduled => &self.retries_scheduled,
            DispatchOutcome::Incident => &self.incidents_raised,
            DispatchOutcome::AwaitingResponse => &self.async_requests_sent,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_async_response(&self) {
        self.async_responses_handled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_watchdog(&self, fired: bool) {
        if fired {
            self.watchdogs_fired.fetch_add(1, Ordering::Relaxed);
        } else {
            self.watchdogs_skipped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            tasks_leased: self.tasks_leased.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            business_errors: self.business_errors.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            incidents_raised: self.incidents_raised.load(Ordering::Relaxed),
            async_requests_sent: self.async_requests_sent.load(Ordering::Relaxed),
            async_responses_handled: self.async_responses_handled.load(Ordering::Relaxed),
            watchdogs_fired: self.watchdogs_fired.load(Ordering::Relaxed),
            watchdogs_skipped: self.watchdogs_skipped.load(Ordering::Relaxed),
            lease_failures: self.lease_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStatsSnapshot {
    pub tasks_leased: u64,
    pub tasks_completed: u64,
    pub business_errors: u64,
    pub retries_scheduled: u64,
    pub incidents_raised: u64,
    pub async_requests_sent: u64,
    pub async_responses_handled: u64,
    pub watchdogs_fired: u64,
    pub watchdogs_skipped: u64,
    pub lease_failures: u64,
}

impl DispatchStatsSnapshot {
    /// Async requests neither answered nor timed out yet
    pub fn async_in_flight(&self) -> u64 {
        self.async_requests_sent
            .saturating_sub(self.async_responses_handled)
            .saturating_sub(self.watchdogs_fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_are_counted() {
        let stats = DispatchStats::new();
        stats.record_leased(3);
        stats.record_outcome(DispatchOutcome::Completed);
        stats.record_outcome(DispatchOutcome::Incident);
        stats.record_outcome(DispatchOutcome::AwaitingResponse);
        stats.record_outcome(DispatchOutcome::AwaitingResponse);
        stats.record_async_response();
        stats.record_watchdog(false);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.tasks_leased, 3);
        assert_eq!(snapshot.tasks_completed, 1);
        assert_eq!(snapshot.incidents_raised, 1);
        assert_eq!(snapshot.async_requests_sent, 2);
        assert_eq!(snapshot.watchdogs_skipped, 1);
        assert_eq!(snapshot.async_in_flight(), 1);
    }
}
