//! # Fetch-Lock-Dispatch
//!
//! Both triggers end in the same leasing routine:
//!
//! - **activity started**: the topic bound to the activity is resolved; if a
//!   registration exists for `(definition key, topic)` leasing for that pair is
//!   deferred until after commit and then run asynchronously.
//! - **sweep**: leasing is deferred the same way for every registration. Runs
//!   at startup and on a fixed interval to pick up tasks no event announced,
//!   such as tasks whose lock expired after a crash.
//!
//! Leased tasks are handed out after the lease commits, each in its own
//! `run_async` action.

use super::ExternalTaskDispatcher;
use crate::constants::{operations, UNBOUNDED_FETCH_SIZE};
use crate::engine::{ActivityStarted, EngineError, FetchRequest};
use crate::error::Result;
use crate::logging::{log_error, log_task_operation};
use crate::registry::Registration;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

impl ExternalTaskDispatcher {
    pub(crate) fn handle_activity_started(&self, event: &ActivityStarted) {
        let Some(topic) = self
            .inner
            .inspector
            .topic_for_activity(&event.process_definition_key, &event.activity_id)
        else {
            return;
        };

        let Some(registration) = self.inner.registry.lookup(&event.process_definition_key, &topic)
        else {
            debug!(
                process_definition_key = %event.process_definition_key,
                topic = %topic,
                activity_id = %event.activity_id,
                "🔍 DISPATCHER: Activity topic not registered, ignoring"
            );
            return;
        };

        debug!(
            operation = operations::ACTIVITY_STARTED,
            registration_key = %registration.key,
            process_instance_id = %event.process_instance_id,
            "📥 DISPATCHER: Activity started, deferring lease"
        );
        self.defer_lease(registration);
    }

    /// Defer leasing for every registration
    ///
    /// Returns the number of registrations a lease was deferred for.
    pub fn sweep(&self) -> usize {
        let registrations = self.inner.registry.registrations();
        debug!(
            operation = operations::SWEEP,
            registrations = registrations.len(),
            "🧹 DISPATCHER: Sweeping registered topics"
        );
        let count = registrations.len();
        for registration in registrations {
            self.defer_lease(registration);
        }
        count
    }

    /// After commit, lease asynchronously for one registration
    pub(crate) fn defer_lease(&self, registration: Arc<Registration>) {
        let dispatcher = self.clone();
        self.inner.host.after_commit(
            operations::FETCH_AND_LOCK,
            async move {
                let leasing = dispatcher.clone();
                dispatcher.inner.host.run_async(
                    operations::FETCH_AND_LOCK,
                    async move { leasing.lease_logged(&registration).await }.boxed(),
                );
            }
            .boxed(),
        );
    }

    /// Like [`defer_lease`](Self::defer_lease), run once `delay` has elapsed
    pub(crate) fn defer_lease_after(&self, registration: Arc<Registration>, delay: Duration) {
        let dispatcher = self.clone();
        self.inner.host.after_commit(
            operations::RETRY,
            async move {
                let leasing = dispatcher.clone();
                dispatcher.inner.host.run_after(
                    delay,
                    operations::RETRY,
                    async move { leasing.lease_logged(&registration).await }.boxed(),
                );
            }
            .boxed(),
        );
    }

    async fn lease_logged(&self, registration: &Registration) {
        if let Err(e) = self.lease_and_dispatch(registration).await {
            self.inner.stats.record_lease_failure();
            log_error(
                "dispatcher",
                operations::FETCH_AND_LOCK,
                &e.to_string(),
                Some(&registration.key.key_string()),
            );
        }
    }

    /// Lease immediately for `(definition_key, topic)` and dispatch what was
    /// leased. Unregistered pairs lease nothing.
    pub async fn fetch_and_dispatch(
        &self,
        definition_key: &str,
        topic: &str,
    ) -> Result<usize> {
        match self.inner.registry.lookup(definition_key, topic) {
            Some(registration) => Ok(self.lease_and_dispatch(&registration).await?),
            None => Ok(0),
        }
    }

    pub(crate) async fn lease_and_dispatch(
        &self,
        registration: &Registration,
    ) -> std::result::Result<usize, EngineError> {
        let request = {
            let config = self.inner.config.read();
            FetchRequest {
                max_tasks: UNBOUNDED_FETCH_SIZE,
                worker_id: config.worker_id.clone(),
                topic: registration.key.topic.clone(),
                lock_duration: registration.effective_lock_timeout(config.default_lock_timeout()),
                variables: registration.variables.clone(),
                process_definition_key: config
                    .lease_per_definition_key
                    .then(|| registration.key.definition_key.clone()),
            }
        };

        let tasks = self.inner.engine.fetch_and_lock(request).await?;
        if tasks.is_empty() {
            return Ok(0);
        }

        let count = tasks.len();
        self.inner.stats.record_leased(count);
        debug!(
            operation = operations::FETCH_AND_LOCK,
            registration_key = %registration.key,
            leased = count,
            "🔒 DISPATCHER: Tasks leased"
        );

        for task in &tasks {
            log_task_operation(
                operations::FETCH_AND_LOCK,
                &task.id,
                Some(&task.topic),
                Some(&task.process_definition_key),
                "leased",
                None,
            );
        }

        // locks become visible to other units of work only once the lease commits
        let dispatcher = self.clone();
        self.inner.host.after_commit(
            operations::PROCESS,
            async move {
                for task in tasks {
                    let processing = dispatcher.clone();
                    dispatcher.inner.host.run_async(
                        operations::PROCESS,
                        async move {
                            processing.process_task(task).await;
                        }
                        .boxed(),
                    );
                }
            }
            .boxed(),
        );

        Ok(count)
    }

    /// Sweep at startup (unless disabled) and then on the configured interval
    ///
    /// Must be called from within a tokio runtime. Dropping the handle stops
    /// the sweeper as well.
    pub fn start_sweeper(&self) -> SweeperHandle {
        let config = self.config();
        info!(
            interval_ms = config.sweep_interval_ms,
            on_startup = config.sweep_on_startup,
            "🧹 DISPATCHER: Sweeper started"
        );

        let dispatcher = self.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.sweep_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            if !config.sweep_on_startup {
                // the first tick completes immediately
                ticker.tick().await;
            }

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        dispatcher.sweep();
                    }
                }
            }
            info!("🛑 DISPATCHER: Sweeper stopped");
        });

        SweeperHandle {
            shutdown: Some(shutdown_tx),
            join,
        }
    }
}

/// Running periodic sweeper
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Stop the sweeper and wait for it to finish
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.join).await {
            log_error("dispatcher", operations::SWEEP, &e.to_string(), None);
        }
    }
}
