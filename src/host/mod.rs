//! # Execution Host
//!
//! Deferral primitives the dispatcher relies on, supplied by whatever hosts it.
//!
//! ## Primitives
//!
//! - **after_commit**: run an action once the unit of work that is currently
//!   leasing or observing a task has committed, so the action sees the task.
//! - **run_async**: run an action in its own execution context, detached from
//!   the caller. Processing never shares a unit of work with leasing.
//! - **run_after**: `run_async` after a delay; used to re-lease tasks once a
//!   retry delay has elapsed.
//!
//! ## Tokio host
//!
//! [`TokioExecutionHost`] has no transactions, so `after_commit` actions start
//! right away on a fresh task. `run_async` actions are bounded by a semaphore
//! and panics are caught and logged instead of tearing down the worker:
//!
//! ```text
//! run_async(action) → spawn → [Semaphore] → catch_unwind(action) → release permit
//! ```

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error};

/// Deferred unit of work
pub type HostAction = BoxFuture<'static, ()>;

/// Host-supplied deferral capabilities
pub trait ExecutionHost: Send + Sync + 'static {
    fn after_commit(&self, label: &'static str, action: HostAction);

    fn run_async(&self, label: &'static str, action: HostAction);

    fn run_after(&self, delay: Duration, label: &'static str, action: HostAction);
}

/// [`ExecutionHost`] on a tokio runtime with bounded parallelism
#[derive(Debug, Clone)]
pub struct TokioExecutionHost {
    handle: Handle,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    max_concurrent: usize,
}

impl TokioExecutionHost {
    pub fn new(handle: Handle, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            handle,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_concurrent,
        }
    }

    /// Host on the runtime of the caller.
    ///
    /// # Panics
    ///
    /// When called outside of a tokio runtime.
    pub fn current(max_concurrent: usize) -> Self {
        Self::new(Handle::current(), max_concurrent)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Actions queued or running, not counting delayed ones still waiting
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no action is queued or running, up to `timeout`
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.in_flight() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    fn spawn_guarded(&self, label: &'static str, action: HostAction, bounded: bool) {
        let semaphore = Arc::clone(&self.semaphore);
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.fetch_add(1, Ordering::SeqCst);

        self.handle.spawn(async move {
            let permit = if bounded {
                match semaphore.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        error!(action = label, "❌ HOST: Semaphore closed, dropping action");
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        return;
                    }
                }
            } else {
                None
            };

            debug!(action = label, "⚙️ HOST: Running deferred action");
            if let Err(panic) = AssertUnwindSafe(action).catch_unwind().await {
                error!(
                    action = label,
                    panic = %panic_message(&*panic),
                    "💥 HOST: Deferred action panicked"
                );
            }

            drop(permit);
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

impl ExecutionHost for TokioExecutionHost {
    fn after_commit(&self, label: &'static str, action: HostAction) {
        self.spawn_guarded(label, action, false);
    }

    fn run_async(&self, label: &'static str, action: HostAction) {
        self.spawn_guarded(label, action, true);
    }

    fn run_after(&self, delay: Duration, label: &'static str, action: HostAction) {
        let host = self.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            host.run_async(label, action);
        });
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
