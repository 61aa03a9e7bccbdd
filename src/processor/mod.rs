//! # Processor Contracts
//!
//! The application-facing side of the dispatcher: what gets called when a task
//! on a registered topic is leased, and what it may return.
//!
//! ## Contracts
//!
//! - **SyncProcessor**: does the work and returns the variables to set when the
//!   task is completed.
//! - **AsyncRequestProcessor**: starts work elsewhere and returns. The task
//!   stays locked until a response arrives through
//!   `ExternalTaskDispatcher::handle_async_input`, keyed by the task id.
//! - **AsyncResponseProcessor**: consumes that response, fills the variables to
//!   set and produces the value returned to whoever delivered the response.
//!
//! Failures are signalled through [`ProcessingError`]: a [`BusinessError`] goes
//! back into the workflow as a modelled error, a [`RetryableFailure`] is retried
//! according to its backoff sequence, anything else raises an incident.
//!
//! ## Usage
//!
//! ```rust
//! use external_task_handler::processor::{sync_processor, ProcessingError, RetryableFailure};
//! use external_task_handler::engine::Variables;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! let processor = sync_processor(|context| async move {
//!     if context.variables.get("amount").is_none() {
//!         return Err(ProcessingError::business("missing_amount", "no amount given"));
//!     }
//!     if context.retries == Some(0) {
//!         return Err(RetryableFailure::with_fixed_delay("gateway busy", 3, Duration::from_secs(1)).into());
//!     }
//!     let mut variables = Variables::new();
//!     variables.insert("status".to_string(), json!("charged"));
//!     Ok(variables)
//! });
//! ```

pub mod context;
pub mod errors;

pub use context::{ResponseContext, TaskContext};
pub use errors::{incident_details_of, BusinessError, ProcessingError, RetryableFailure};

use crate::engine::Variables;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

pub type ProcessingResult<T> = Result<T, ProcessingError>;

/// Processes a task and returns the variables to complete it with
#[async_trait]
pub trait SyncProcessor: Send + Sync + 'static {
    async fn process(&self, context: TaskContext) -> ProcessingResult<Variables>;
}

/// Sends a request for a task whose result arrives later
#[async_trait]
pub trait AsyncRequestProcessor: Send + Sync + 'static {
    /// Returns an instant overriding the registration's response timeout for
    /// this request, or `None` to use the registration's setting.
    async fn request(&self, context: TaskContext) -> ProcessingResult<Option<DateTime<Utc>>>;
}

/// Handles the response correlated to an earlier async request
#[async_trait]
pub trait AsyncResponseProcessor: Send + Sync + 'static {
    /// `variables` collects what is set on completion of the task. The returned
    /// value goes back to the caller of `handle_async_input`.
    async fn respond(
        &self,
        context: ResponseContext,
        input: Value,
        variables: &mut Variables,
    ) -> ProcessingResult<Value>;
}

/// Value and variables produced by a closure-based response processor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AsyncResponse {
    pub result: Value,
    pub variables: Variables,
}

impl AsyncResponse {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            variables: Variables::new(),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }
}

/// Closure adapter for [`SyncProcessor`]
pub struct FnSyncProcessor<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> SyncProcessor for FnSyncProcessor<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcessingResult<Variables>> + Send + 'static,
{
    async fn process(&self, context: TaskContext) -> ProcessingResult<Variables> {
        (self.func)(context).await
    }
}

/// Closure adapter for [`AsyncRequestProcessor`]
pub struct FnRequestProcessor<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> AsyncRequestProcessor for FnRequestProcessor<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcessingResult<Option<DateTime<Utc>>>> + Send + 'static,
{
    async fn request(&self, context: TaskContext) -> ProcessingResult<Option<DateTime<Utc>>> {
        (self.func)(context).await
    }
}

/// Closure adapter for [`AsyncResponseProcessor`]
pub struct FnResponseProcessor<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> AsyncResponseProcessor for FnResponseProcessor<F>
where
    F: Fn(ResponseContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcessingResult<AsyncResponse>> + Send + 'static,
{
    async fn respond(
        &self,
        context: ResponseContext,
        input: Value,
        variables: &mut Variables,
    ) -> ProcessingResult<Value> {
        let response = (self.func)(context, input).await?;
        variables.extend(response.variables);
        Ok(response.result)
    }
}

pub fn sync_processor<F, Fut>(func: F) -> Arc<dyn SyncProcessor>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcessingResult<Variables>> + Send + 'static,
{
    Arc::new(FnSyncProcessor { func })
}

pub fn request_processor<F, Fut>(func: F) -> Arc<dyn AsyncRequestProcessor>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcessingResult<Option<DateTime<Utc>>>> + Send + 'static,
{
    Arc::new(FnRequestProcessor { func })
}

pub fn response_processor<F, Fut>(func: F) -> Arc<dyn AsyncResponseProcessor>
where
    F: Fn(ResponseContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcessingResult<AsyncResponse>> + Send + 'static,
{
    Arc::new(FnResponseProcessor { func })
}
