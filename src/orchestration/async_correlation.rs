//! # Async Correlation
//!
//! Delivers out-of-band responses to the response processor of the task they
//! answer. The correlation id is the external task id; no separate table is
//! kept. The registration is looked up again from the task's definition key
//! and topic.
//!
//! Failure handling depends on how far the response got:
//!
//! - before the response processor returns, its errors go back to the caller,
//!   except business errors, which are delivered to the engine and answered
//!   with the result they carry;
//! - once it has returned, the caller gets its result no matter what. If the
//!   completion is then rejected, the variables are applied to the execution
//!   and an incident records the rejection, in a separate unit of work.

use super::outcome_translator::guarded;
use super::ExternalTaskDispatcher;
use crate::constants::operations;
use crate::engine::{EngineError, ExternalTask, FailureReport, Variables};
use crate::logging::log_error;
use crate::processor::{incident_details_of, ProcessingError, ResponseContext};
use crate::registry::ProcessingContract;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AsyncInputError {
    #[error("No locked external task with correlation id {0}")]
    NotFound(String),

    #[error("Correlation id {correlation_id} belongs to sync registration {registration_key}")]
    ProtocolMismatch {
        correlation_id: String,
        registration_key: String,
    },

    #[error("No registration for {0}")]
    NoRegistration(String),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error("Workflow engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Failed to convert async payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ExternalTaskDispatcher {
    /// Deliver a response for the task `correlation_id`
    ///
    /// Returns the response processor's result, or the result carried by a
    /// business error (`Value::Null` when it carries none).
    pub async fn handle_async_input(
        &self,
        correlation_id: &str,
        input: Value,
    ) -> Result<Value, AsyncInputError> {
        let task = self
            .inner
            .engine
            .find_task(correlation_id)
            .await?
            .filter(ExternalTask::is_locked)
            .ok_or_else(|| AsyncInputError::NotFound(correlation_id.to_string()))?;

        let registration = self
            .inner
            .registry
            .lookup(&task.process_definition_key, &task.topic)
            .ok_or_else(|| {
                AsyncInputError::NoRegistration(format!(
                    "{}#{}",
                    task.process_definition_key, task.topic
                ))
            })?;

        let response = match &registration.contract {
            ProcessingContract::Async { response, .. } => response,
            ProcessingContract::Sync(_) => {
                return Err(AsyncInputError::ProtocolMismatch {
                    correlation_id: correlation_id.to_string(),
                    registration_key: registration.key.key_string(),
                })
            }
        };

        let worker_id = self.worker_id();
        let mut variables = Variables::new();
        let outcome = guarded(response.respond(
            ResponseContext::from(&task),
            input,
            &mut variables,
        ))
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(ProcessingError::Business(business)) => {
                info!(
                    operation = operations::BUSINESS_ERROR,
                    external_task_id = %task.id,
                    error_code = %business.code,
                    "⚠️ DISPATCHER: Business error in async response"
                );
                self.inner.engine
                    .handle_business_error(
                        &task.id,
                        &worker_id,
                        &business.code,
                        &business.message,
                        business.variables,
                    )
                    .await?;
                self.inner.stats.record_async_response();
                return Ok(business.result.unwrap_or(Value::Null));
            }
            Err(other) => return Err(other.into()),
        };

        self.inner.stats.record_async_response();
        match self
            .inner
            .engine
            .complete(&task.id, &worker_id, variables.clone())
            .await
        {
            Ok(()) => {
                debug!(
                    operation = operations::ASYNC_RESPONSE,
                    external_task_id = %task.id,
                    "✅ DISPATCHER: Async task completed"
                );
            }
            Err(e) => self.defer_completion_failure(task, worker_id, variables, e),
        }

        Ok(result)
    }

    /// [`handle_async_input`](Self::handle_async_input) with serde conversion
    /// of the input and the result
    pub async fn handle_async_input_typed<I, R>(
        &self,
        correlation_id: &str,
        input: &I,
    ) -> Result<R, AsyncInputError>
    where
        I: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let input = serde_json::to_value(input)?;
        let result = self.handle_async_input(correlation_id, input).await?;
        Ok(serde_json::from_value(result)?)
    }

    fn defer_completion_failure(
        &self,
        task: ExternalTask,
        worker_id: String,
        variables: Variables,
        error: EngineError,
    ) {
        warn!(
            operation = operations::ASYNC_RESPONSE,
            external_task_id = %task.id,
            error = %error,
            "🚨 DISPATCHER: Completing async task failed, raising incident"
        );

        let engine = self.inner.engine.clone();
        self.inner.host.after_commit(
            operations::INCIDENT,
            async move {
                if !variables.is_empty() {
                    if let Err(e) = engine.set_variables(&task.execution_id, variables).await {
                        log_error("dispatcher", "set_variables", &e.to_string(), Some(&task.id));
                    }
                }

                let report = FailureReport::terminal(error.to_string(), incident_details_of(&error));
                if let Err(e) = engine.handle_failure(&task.id, &worker_id, report).await {
                    log_error("dispatcher", "handle_failure", &e.to_string(), Some(&task.id));
                }
            }
            .boxed(),
        );
        self.inner.stats.record_outcome(crate::constants::DispatchOutcome::Incident);
    }
}
