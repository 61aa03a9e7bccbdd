//! Per-invocation data handed to processors.

use crate::engine::{ExternalTask, LockedTask, Variables};
use serde::{Deserialize, Serialize};

/// Everything a sync processor or an async request processor learns about the
/// task it is working on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    pub external_task_id: String,
    pub process_definition_key: String,
    pub topic: String,
    pub process_instance_id: String,
    pub business_key: Option<String>,
    pub activity_id: String,
    pub execution_id: String,
    /// Variables fetched according to the registration's variable filter
    pub variables: Variables,
    /// Retries left as recorded by the engine; `None` on the first attempt
    pub retries: Option<u32>,
}

impl TaskContext {
    /// Id under which an async response must be delivered
    pub fn correlation_id(&self) -> &str {
        &self.external_task_id
    }

    pub fn is_first_attempt(&self) -> bool {
        self.retries.is_none()
    }
}

impl From<&LockedTask> for TaskContext {
    fn from(task: &LockedTask) -> Self {
        Self {
            external_task_id: task.id.clone(),
            process_definition_key: task.process_definition_key.clone(),
            topic: task.topic.clone(),
            process_instance_id: task.process_instance_id.clone(),
            business_key: task.business_key.clone(),
            activity_id: task.activity_id.clone(),
            execution_id: task.execution_id.clone(),
            variables: task.variables.clone(),
            retries: task.retries,
        }
    }
}

/// What an async response processor learns about the task being answered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseContext {
    pub correlation_id: String,
    pub process_instance_id: String,
    pub business_key: Option<String>,
    pub activity_id: String,
    pub execution_id: String,
    pub retries: Option<u32>,
}

impl From<&ExternalTask> for ResponseContext {
    fn from(task: &ExternalTask) -> Self {
        Self {
            correlation_id: task.id.clone(),
            process_instance_id: task.process_instance_id.clone(),
            business_key: task.business_key.clone(),
            activity_id: task.activity_id.clone(),
            execution_id: task.execution_id.clone(),
            retries: task.retries,
        }
    }
}
