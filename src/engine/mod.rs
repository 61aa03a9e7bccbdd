//! # Workflow Engine Port
//!
//! The operations the dispatcher needs from a workflow engine, and the
//! callbacks the engine uses to notify the dispatcher.
//!
//! ## Architecture
//!
//! ```text
//! ExternalTaskDispatcher ──fetch_and_lock / complete / handle_*──▶ WorkflowEngine
//!          ▲                                                          │
//!          ├──────────── ActivityListener::on_activity_started ◀─────┤
//!          └──────────── JobHandler::execute (delayed jobs)    ◀─────┘
//! ```
//!
//! [`in_memory::InMemoryWorkflowEngine`] is a complete in-process
//! implementation used by the test-suite and by embedders that do not need
//! durability.

pub mod in_memory;

pub use in_memory::{
    ActivityDefinition, ActivityKind, Incident, InMemoryWorkflowEngine, InstanceState,
    ProcessDefinition, ProcessInstance, ScheduledJob,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Process variables by name
pub type Variables = HashMap<String, Value>;

pub type JobId = String;

/// Errors reported by a workflow engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("External task not found: {0}")]
    TaskNotFound(String),

    #[error("External task {task_id} is not locked by worker {worker_id}")]
    LockOwnership { task_id: String, worker_id: String },

    #[error("Process definition not found: {0}")]
    DefinitionNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Workflow engine unavailable: {0}")]
    Unavailable(String),

    #[error("Workflow engine error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Which variables to fetch with a leased task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "names")]
pub enum VariableFilter {
    #[default]
    All,
    None,
    Names(Vec<String>),
}

impl VariableFilter {
    /// Apply the filter to a full variable set
    pub fn select(&self, variables: &Variables) -> Variables {
        match self {
            VariableFilter::All => variables.clone(),
            VariableFilter::None => Variables::new(),
            VariableFilter::Names(names) => names
                .iter()
                .filter_map(|name| {
                    variables
                        .get(name)
                        .map(|value| (name.clone(), value.clone()))
                })
                .collect(),
        }
    }
}

/// Parameters of a fetch-and-lock call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub max_tasks: usize,
    pub worker_id: String,
    pub topic: String,
    pub lock_duration: Duration,
    pub variables: VariableFilter,
    /// Restrict leasing to tasks of one process definition
    pub process_definition_key: Option<String>,
}

/// A task leased by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockedTask {
    pub id: String,
    pub process_definition_key: String,
    pub topic: String,
    pub process_instance_id: String,
    pub business_key: Option<String>,
    pub activity_id: String,
    pub execution_id: String,
    pub lock_expiration: DateTime<Utc>,
    pub variables: Variables,
    pub retries: Option<u32>,
}

/// Current engine view of an external task, locked or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTask {
    pub id: String,
    pub process_definition_key: String,
    pub topic: String,
    pub process_instance_id: String,
    pub business_key: Option<String>,
    pub activity_id: String,
    pub execution_id: String,
    pub worker_id: Option<String>,
    pub lock_expiration: Option<DateTime<Utc>>,
    pub retries: Option<u32>,
    pub error_message: Option<String>,
}

impl ExternalTask {
    /// Assigned to a worker, regardless of whether the lease has run out
    pub fn is_locked(&self) -> bool {
        self.worker_id.is_some()
    }
}

/// Failure reported against a locked task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub error_message: String,
    pub error_details: String,
    /// Zero raises an incident
    pub retries: u32,
    pub retry_delay: Duration,
}

impl FailureReport {
    /// Failure that is not retried
    pub fn terminal(error_message: impl Into<String>, error_details: impl Into<String>) -> Self {
        Self {
            error_message: error_message.into(),
            error_details: error_details.into(),
            retries: 0,
            retry_delay: Duration::ZERO,
        }
    }
}

/// Delayed job handed to the engine's job executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub handler_type: String,
    pub configuration: String,
}

/// Notification that a process instance entered an activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityStarted {
    pub process_definition_key: String,
    pub activity_id: String,
    pub process_instance_id: String,
}

/// Outbound operations on the workflow engine
#[async_trait]
pub trait WorkflowEngine: Send + Sync + 'static {
    async fn fetch_and_lock(&self, request: FetchRequest) -> EngineResult<Vec<LockedTask>>;

    async fn complete(&self, task_id: &str, worker_id: &str, variables: Variables)
        -> EngineResult<()>;

    async fn handle_business_error(
        &self,
        task_id: &str,
        worker_id: &str,
        error_code: &str,
        error_message: &str,
        variables: Option<Variables>,
    ) -> EngineResult<()>;

    async fn handle_failure(
        &self,
        task_id: &str,
        worker_id: &str,
        report: FailureReport,
    ) -> EngineResult<()>;

    async fn find_task(&self, task_id: &str) -> EngineResult<Option<ExternalTask>>;

    /// Set variables directly on an execution, outside of any task completion
    async fn set_variables(&self, execution_id: &str, variables: Variables) -> EngineResult<()>;

    async fn schedule_job(&self, due: DateTime<Utc>, payload: JobPayload) -> EngineResult<JobId>;

    /// Route due jobs of `job_type` to `handler`
    fn register_job_handler(&self, job_type: &str, handler: Arc<dyn JobHandler>);

    fn add_activity_listener(&self, listener: Arc<dyn ActivityListener>);
}

/// Resolves the topic bound to an activity of a process definition
pub trait ProcessDefinitionInspector: Send + Sync + 'static {
    fn topic_for_activity(&self, process_definition_key: &str, activity_id: &str)
        -> Option<String>;
}

/// Callback for delayed jobs coming due
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn execute(&self, configuration: &str) -> anyhow::Result<()>;
}

/// Callback for process activities being entered
pub trait ActivityListener: Send + Sync + 'static {
    fn on_activity_started(&self, event: &ActivityStarted);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn variables() -> Variables {
        let mut variables = Variables::new();
        variables.insert("a".to_string(), json!(1));
        variables.insert("b".to_string(), json!("two"));
        variables
    }

    #[test]
    fn test_variable_filter_all() {
        assert_eq!(VariableFilter::All.select(&variables()), variables());
    }

    #[test]
    fn test_variable_filter_none() {
        assert!(VariableFilter::None.select(&variables()).is_empty());
    }

    #[test]
    fn test_variable_filter_names_skips_missing() {
        let filter = VariableFilter::Names(vec!["b".to_string(), "missing".to_string()]);
        let selected = filter.select(&variables());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected.get("b"), Some(&json!("two")));
    }

    #[test]
    fn test_terminal_failure_report() {
        let report = FailureReport::terminal("boom", "trace");
        assert_eq!(report.retries, 0);
        assert_eq!(report.retry_delay, Duration::ZERO);
    }

    #[test]
    fn test_engine_error_display() {
        let error = EngineError::LockOwnership {
            task_id: "t1".to_string(),
            worker_id: "w1".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "External task t1 is not locked by worker w1"
        );
    }
}
