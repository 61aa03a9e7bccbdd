//! # Outcome Translator
//!
//! Runs the registered contract for one leased task and reports what came of
//! it to the engine:
//!
//! | Processor result        | Engine call                                          |
//! |-------------------------|------------------------------------------------------|
//! | variables               | `complete`                                           |
//! | `BusinessError`         | `handle_business_error` (with its variables, if any) |
//! | `RetryableFailure`      | `handle_failure` with the next retry budget; re-lease after the delay while retries remain |
//! | anything else, panics   | `handle_failure` with zero retries (incident)        |
//!
//! Async request processors are translated the same way when they fail. When
//! they return normally the task waits for its response and a watchdog job is
//! scheduled if a response timeout applies.

use super::timeout_watchdog::WatchdogJob;
use super::ExternalTaskDispatcher;
use crate::constants::{operations, DispatchOutcome, ASYNC_TIMEOUT_JOB_TYPE};
use crate::engine::{FailureReport, JobPayload, LockedTask, Variables};
use crate::host::panic_message;
use crate::logging::{log_error, log_task_operation};
use crate::processor::{incident_details_of, ProcessingError, ProcessingResult, TaskContext};
use crate::registry::{ProcessingContract, Registration};
use crate::resilience::next_retry;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Await a processor call, turning a panic into a terminal failure
pub(crate) async fn guarded<T, F>(call: F) -> ProcessingResult<T>
where
    F: Future<Output = ProcessingResult<T>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(ProcessingError::failure(format!(
            "Processor panicked: {}",
            panic_message(&*panic)
        ))),
    }
}

impl ExternalTaskDispatcher {
    /// Process one leased task and report the outcome to the engine
    pub async fn process_task(&self, task: LockedTask) -> DispatchOutcome {
        let worker_id = self.worker_id();

        let Some(registration) = self
            .inner
            .registry
            .lookup(&task.process_definition_key, &task.topic)
        else {
            let message = format!(
                "No processor registered for {}#{}",
                task.process_definition_key, task.topic
            );
            warn!(external_task_id = %task.id, "⚠️ DISPATCHER: {}", message);
            let report = FailureReport::terminal(message.clone(), message);
            self.report_failure(&task, &worker_id, report).await;
            return self.finish(&task, DispatchOutcome::Incident);
        };

        let context = TaskContext::from(&task);
        let outcome = match &registration.contract {
            ProcessingContract::Sync(processor) => {
                match guarded(processor.process(context)).await {
                    Ok(variables) => self.complete_task(&task, &worker_id, variables).await,
                    Err(error) => self.translate_failure(&task, &registration, &worker_id, error).await,
                }
            }
            ProcessingContract::Async {
                request,
                response_timeout,
                ..
            } => match guarded(request.request(context)).await {
                Ok(due_override) => {
                    self.arm_watchdog(&task, *response_timeout, due_override)
                        .await;
                    DispatchOutcome::AwaitingResponse
                }
                Err(error) => self.translate_failure(&task, &registration, &worker_id, error).await,
            },
        };

        self.finish(&task, outcome)
    }

    fn finish(&self, task: &LockedTask, outcome: DispatchOutcome) -> DispatchOutcome {
        self.inner.stats.record_outcome(outcome);
        log_task_operation(
            operations::PROCESS,
            &task.id,
            Some(&task.topic),
            Some(&task.process_definition_key),
            &outcome.to_string(),
            None,
        );
        outcome
    }

    async fn complete_task(
        &self,
        task: &LockedTask,
        worker_id: &str,
        variables: Variables,
    ) -> DispatchOutcome {
        match self.inner.engine.complete(&task.id, worker_id, variables).await {
            Ok(()) => {
                debug!(
                    operation = operations::COMPLETE,
                    external_task_id = %task.id,
                    "✅ DISPATCHER: Task completed"
                );
                DispatchOutcome::Completed
            }
            Err(e) => {
                let report = FailureReport::terminal(e.to_string(), incident_details_of(&e));
                self.report_failure(task, worker_id, report).await;
                DispatchOutcome::Incident
            }
        }
    }

    pub(crate) async fn translate_failure(
        &self,
        task: &LockedTask,
        registration: &Arc<Registration>,
        worker_id: &str,
        error: ProcessingError,
    ) -> DispatchOutcome {
        match error {
            ProcessingError::Business(business) => {
                info!(
                    operation = operations::BUSINESS_ERROR,
                    external_task_id = %task.id,
                    error_code = %business.code,
                    "⚠️ DISPATCHER: Business error reported by processor"
                );
                let delivered = self
                    .inner
                    .engine
                    .handle_business_error(
                        &task.id,
                        worker_id,
                        &business.code,
                        &business.message,
                        business.variables.clone(),
                    )
                    .await;
                match delivered {
                    Ok(()) => DispatchOutcome::BusinessError,
                    Err(e) => {
                        let report = FailureReport::terminal(e.to_string(), incident_details_of(&e));
                        self.report_failure(task, worker_id, report).await;
                        DispatchOutcome::Incident
                    }
                }
            }
            ProcessingError::Retryable(ref failure) => {
                let backoff = if failure.retry_delays.is_empty() {
                    vec![self.inner.config.read().default_retry_delay()]
                } else {
                    failure.retry_delays.clone()
                };
                let decision = next_retry(failure.max_attempts, task.retries, &backoff);

                info!(
                    operation = operations::RETRY,
                    external_task_id = %task.id,
                    attempt = decision.attempt,
                    retries_left = decision.retries_left,
                    delay_ms = decision.delay.as_millis() as u64,
                    "🔁 DISPATCHER: Retryable failure"
                );

                let report = FailureReport {
                    error_message: failure.message.clone(),
                    error_details: error.incident_details(),
                    retries: decision.retries_left,
                    retry_delay: decision.delay,
                };
                if !self.report_failure(task, worker_id, report).await {
                    return DispatchOutcome::Incident;
                }

                if decision.will_retry() {
                    self.defer_lease_after(Arc::clone(registration), decision.delay);
                    DispatchOutcome::RetryScheduled
                } else {
                    DispatchOutcome::Incident
                }
            }
            ProcessingError::Failure(_) => {
                let report = FailureReport::terminal(error.message(), error.incident_details());
                self.report_failure(task, worker_id, report).await;
                DispatchOutcome::Incident
            }
        }
    }

    /// Report a failure; engine errors are logged and never propagated
    async fn report_failure(&self, task: &LockedTask, worker_id: &str, report: FailureReport) -> bool {
        if report.retries == 0 {
            warn!(
                operation = operations::INCIDENT,
                external_task_id = %task.id,
                process_instance_id = %task.process_instance_id,
                error_message = %report.error_message,
                "🚨 DISPATCHER: Reporting terminal failure"
            );
        }
        match self.inner.engine.handle_failure(&task.id, worker_id, report).await {
            Ok(()) => true,
            Err(e) => {
                log_error("dispatcher", "handle_failure", &e.to_string(), Some(&task.id));
                false
            }
        }
    }

    async fn arm_watchdog(
        &self,
        task: &LockedTask,
        response_timeout: Option<Duration>,
        due_override: Option<DateTime<Utc>>,
    ) {
        let due = due_override.or_else(|| {
            response_timeout
                .and_then(|timeout| chrono::Duration::from_std(timeout).ok())
                .and_then(|timeout| Utc::now().checked_add_signed(timeout))
        });

        let Some(due) = due else {
            debug!(external_task_id = %task.id, "📤 DISPATCHER: Async request sent, no response timeout");
            return;
        };

        let job = WatchdogJob::new(task.id.clone(), task.lock_expiration);
        let payload = JobPayload {
            handler_type: ASYNC_TIMEOUT_JOB_TYPE.to_string(),
            configuration: job.to_string(),
        };

        match self.inner.engine.schedule_job(due, payload).await {
            Ok(job_id) => debug!(
                operation = operations::ASYNC_REQUEST,
                external_task_id = %task.id,
                job_id = %job_id,
                due = %due,
                "⏱️ DISPATCHER: Response watchdog scheduled"
            ),
            Err(e) => log_error(
                "dispatcher",
                operations::TIMEOUT_WATCHDOG,
                &e.to_string(),
                Some(&task.id),
            ),
        }
    }
}
