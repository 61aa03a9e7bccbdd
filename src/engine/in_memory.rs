//! # In-Memory Workflow Engine
//!
//! Complete in-process [`WorkflowEngine`] for tests and for embedders that do
//! not need durability.
//!
//! ## Key Features
//!
//! - **Linear process definitions**: a definition is an ordered list of
//!   activities; activities bound to a topic create an external task and wait,
//!   all others are passed through immediately.
//! - **Lease semantics**: fetch-and-lock honours topic, definition key, lock
//!   expiry and retries; lock expiry is kept at millisecond precision.
//! - **Failures and incidents**: failures with retries left hold the task back
//!   for the retry delay, failures without retries raise an incident that is
//!   resolved when the task is completed anyway.
//! - **Business errors**: routed to the activity's error boundary when one is
//!   modelled, otherwise the instance ends with the error code recorded.
//! - **Delayed jobs**: executed on the tokio runtime once due, by the handler
//!   registered for the job's type.
//! - **Activity notifications**: listeners are told about every activity an
//!   instance enters, after the engine state has been updated.
//!
//! ## Usage
//!
//! ```rust
//! use external_task_handler::engine::{ActivityDefinition, InMemoryWorkflowEngine, ProcessDefinition, Variables};
//!
//! let engine = InMemoryWorkflowEngine::new();
//! engine.deploy(
//!     ProcessDefinition::new("order")
//!         .activity(ActivityDefinition::service_task("ChargeCard", "charge")),
//! );
//! let instance_id = engine
//!     .start_process_instance("order", Some("order-42"), Variables::new())
//!     .unwrap();
//! assert_eq!(engine.task_for_instance(&instance_id).map(|t| t.topic), Some("charge".to_string()));
//! ```

use super::{
    ActivityListener, ActivityStarted, EngineError, EngineResult, ExternalTask, FailureReport,
    FetchRequest, JobHandler, JobId, JobPayload, LockedTask, ProcessDefinitionInspector,
    Variables, WorkflowEngine,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Kind of a process activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    ServiceTask,
    SendTask,
    MessageEvent,
    BusinessRuleTask,
    /// Never bound to a topic; passed through
    ManualTask,
}

impl ActivityKind {
    /// Whether activities of this kind can be implemented as external tasks
    pub fn supports_topic(self) -> bool {
        !matches!(self, ActivityKind::ManualTask)
    }
}

/// One step of a [`ProcessDefinition`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityDefinition {
    pub id: String,
    pub kind: ActivityKind,
    pub topic: Option<String>,
    /// Activity to continue with when a business error is reported here
    pub error_boundary: Option<String>,
}

impl ActivityDefinition {
    fn external(id: impl Into<String>, kind: ActivityKind, topic: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            topic: Some(topic.into()),
            error_boundary: None,
        }
    }

    pub fn service_task(id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self::external(id, ActivityKind::ServiceTask, topic)
    }

    pub fn send_task(id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self::external(id, ActivityKind::SendTask, topic)
    }

    pub fn message_event(id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self::external(id, ActivityKind::MessageEvent, topic)
    }

    pub fn business_rule_task(id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self::external(id, ActivityKind::BusinessRuleTask, topic)
    }

    pub fn manual_task(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ActivityKind::ManualTask,
            topic: None,
            error_boundary: None,
        }
    }

    pub fn with_error_boundary(mut self, target_activity_id: impl Into<String>) -> Self {
        self.error_boundary = Some(target_activity_id.into());
        self
    }

    /// Topic of the external task this activity creates, if any
    pub fn external_topic(&self) -> Option<&str> {
        if self.kind.supports_topic() {
            self.topic.as_deref()
        } else {
            None
        }
    }
}

/// Ordered list of activities deployed under a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub key: String,
    pub activities: Vec<ActivityDefinition>,
}

impl ProcessDefinition {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            activities: Vec::new(),
        }
    }

    pub fn activity(mut self, activity: ActivityDefinition) -> Self {
        self.activities.push(activity);
        self
    }

    fn position(&self, activity_id: &str) -> Option<usize> {
        self.activities.iter().position(|a| a.id == activity_id)
    }

    fn find(&self, activity_id: &str) -> Option<&ActivityDefinition> {
        self.activities.iter().find(|a| a.id == activity_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum InstanceState {
    Active,
    Completed,
    EndedByError { error_code: String },
}

/// Snapshot of a running or finished process instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub id: String,
    pub definition_key: String,
    pub business_key: Option<String>,
    pub execution_id: String,
    pub variables: Variables,
    pub current_activity: Option<String>,
    pub state: InstanceState,
    /// Activities entered so far, in order
    pub history: Vec<String>,
    /// Codes of the business errors delivered to this instance
    pub business_errors: Vec<String>,
}

impl ProcessInstance {
    pub fn is_ended(&self) -> bool {
        !matches!(self.state, InstanceState::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub process_instance_id: String,
    pub external_task_id: String,
    pub activity_id: String,
    pub message: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: JobId,
    pub due: DateTime<Utc>,
    pub payload: JobPayload,
    pub executed: bool,
}

#[derive(Debug, Clone)]
struct TaskRecord {
    task: ExternalTask,
    error_details: Option<String>,
    sequence: u64,
}

impl TaskRecord {
    fn is_fetchable(&self, request: &FetchRequest, now: DateTime<Utc>) -> bool {
        let task = &self.task;
        task.topic == request.topic
            && request
                .process_definition_key
                .as_ref()
                .map_or(true, |key| *key == task.process_definition_key)
            && task.retries != Some(0)
            && task.lock_expiration.map_or(true, |expiry| expiry <= now)
    }

    fn ensure_owner(&self, worker_id: &str) -> EngineResult<()> {
        if self.task.worker_id.as_deref() == Some(worker_id) {
            Ok(())
        } else {
            Err(EngineError::LockOwnership {
                task_id: self.task.id.clone(),
                worker_id: worker_id.to_string(),
            })
        }
    }
}

#[derive(Debug, Default)]
struct EngineState {
    definitions: HashMap<String, ProcessDefinition>,
    instances: HashMap<String, ProcessInstance>,
    tasks: HashMap<String, TaskRecord>,
    incidents: Vec<Incident>,
    jobs: HashMap<JobId, ScheduledJob>,
    failing_completions: HashSet<String>,
    completions: HashMap<String, Variables>,
    next_sequence: u64,
}

impl EngineState {
    fn definition_of(&self, instance_id: &str) -> EngineResult<ProcessDefinition> {
        let instance = self
            .instances
            .get(instance_id)
            .ok_or_else(|| EngineError::Internal(format!("unknown instance {instance_id}")))?;
        self.definitions
            .get(&instance.definition_key)
            .cloned()
            .ok_or_else(|| EngineError::DefinitionNotFound(instance.definition_key.clone()))
    }

    /// Enter activities from `index` on until one waits on an external task or
    /// the definition runs out
    fn advance(&mut self, instance_id: &str, mut index: usize) -> EngineResult<Vec<ActivityStarted>> {
        let definition = self.definition_of(instance_id)?;
        let mut events = Vec::new();

        loop {
            let instance = self
                .instances
                .get_mut(instance_id)
                .ok_or_else(|| EngineError::Internal(format!("unknown instance {instance_id}")))?;

            let Some(activity) = definition.activities.get(index) else {
                instance.current_activity = None;
                if instance.state == InstanceState::Active {
                    instance.state = InstanceState::Completed;
                }
                debug!(process_instance_id = %instance_id, "🏁 ENGINE: Process instance completed");
                break;
            };

            instance.current_activity = Some(activity.id.clone());
            instance.history.push(activity.id.clone());
            events.push(ActivityStarted {
                process_definition_key: definition.key.clone(),
                activity_id: activity.id.clone(),
                process_instance_id: instance_id.to_string(),
            });

            if let Some(topic) = activity.external_topic() {
                let task = ExternalTask {
                    id: Uuid::new_v4().to_string(),
                    process_definition_key: definition.key.clone(),
                    topic: topic.to_string(),
                    process_instance_id: instance_id.to_string(),
                    business_key: instance.business_key.clone(),
                    activity_id: activity.id.clone(),
                    execution_id: instance.execution_id.clone(),
                    worker_id: None,
                    lock_expiration: None,
                    retries: None,
                    error_message: None,
                };
                self.next_sequence += 1;
                debug!(
                    external_task_id = %task.id,
                    topic = %task.topic,
                    activity_id = %task.activity_id,
                    "📝 ENGINE: External task created"
                );
                self.tasks.insert(
                    task.id.clone(),
                    TaskRecord {
                        task,
                        error_details: None,
                        sequence: self.next_sequence,
                    },
                );
                break;
            }

            index += 1;
        }

        Ok(events)
    }

    fn resolve_incidents(&mut self, task_id: &str) {
        for incident in self
            .incidents
            .iter_mut()
            .filter(|i| i.external_task_id == task_id && !i.resolved)
        {
            incident.resolved = true;
        }
    }

    fn owned_task(&self, task_id: &str, worker_id: &str) -> EngineResult<&TaskRecord> {
        let record = self
            .tasks
            .get(task_id)
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
        record.ensure_owner(worker_id)?;
        Ok(record)
    }
}

fn truncate_to_millis(instant: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(instant.timestamp_millis()).unwrap_or(instant)
}

fn after(now: DateTime<Utc>, duration: Duration) -> EngineResult<DateTime<Utc>> {
    let delta = chrono::Duration::from_std(duration)
        .map_err(|e| EngineError::Internal(format!("duration out of range: {e}")))?;
    now.checked_add_signed(delta)
        .map(truncate_to_millis)
        .ok_or_else(|| EngineError::Internal(format!("{duration:?} after {now} is out of range")))
}

/// In-process workflow engine
pub struct InMemoryWorkflowEngine {
    state: Arc<Mutex<EngineState>>,
    job_handlers: Arc<DashMap<String, Arc<dyn JobHandler>>>,
    listeners: RwLock<Vec<Arc<dyn ActivityListener>>>,
    available: AtomicBool,
}

impl std::fmt::Debug for InMemoryWorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryWorkflowEngine")
            .field("definitions", &state.definitions.len())
            .field("instances", &state.instances.len())
            .field("tasks", &state.tasks.len())
            .field("incidents", &state.incidents.len())
            .finish()
    }
}

impl Default for InMemoryWorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWorkflowEngine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState::default())),
            job_handlers: Arc::new(DashMap::new()),
            listeners: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Deploy a definition, replacing any previous one with the same key
    pub fn deploy(&self, definition: ProcessDefinition) {
        info!(
            process_definition_key = %definition.key,
            activities = definition.activities.len(),
            "📦 ENGINE: Process definition deployed"
        );
        self.state
            .lock()
            .definitions
            .insert(definition.key.clone(), definition);
    }

    /// Start an instance and run it up to its first external task
    pub fn start_process_instance(
        &self,
        definition_key: &str,
        business_key: Option<&str>,
        variables: Variables,
    ) -> EngineResult<String> {
        self.ensure_available()?;
        let instance_id = Uuid::new_v4().to_string();

        let events = {
            let mut state = self.state.lock();
            if !state.definitions.contains_key(definition_key) {
                return Err(EngineError::DefinitionNotFound(definition_key.to_string()));
            }
            state.instances.insert(
                instance_id.clone(),
                ProcessInstance {
                    id: instance_id.clone(),
                    definition_key: definition_key.to_string(),
                    business_key: business_key.map(str::to_string),
                    execution_id: Uuid::new_v4().to_string(),
                    variables,
                    current_activity: None,
                    state: InstanceState::Active,
                    history: Vec::new(),
                    business_errors: Vec::new(),
                },
            );
            state.advance(&instance_id, 0)?
        };

        info!(
            process_instance_id = %instance_id,
            process_definition_key = %definition_key,
            "▶️ ENGINE: Process instance started"
        );
        self.notify(&events);
        Ok(instance_id)
    }

    pub fn process_instance(&self, instance_id: &str) -> Option<ProcessInstance> {
        self.state.lock().instances.get(instance_id).cloned()
    }

    pub fn external_tasks(&self) -> Vec<ExternalTask> {
        let state = self.state.lock();
        let mut records: Vec<&TaskRecord> = state.tasks.values().collect();
        records.sort_by_key(|r| r.sequence);
        records.into_iter().map(|r| r.task.clone()).collect()
    }

    /// Open task of an instance, if it is waiting on one
    pub fn task_for_instance(&self, instance_id: &str) -> Option<ExternalTask> {
        self.state
            .lock()
            .tasks
            .values()
            .find(|r| r.task.process_instance_id == instance_id)
            .map(|r| r.task.clone())
    }

    /// Details recorded with the last failure of a task
    pub fn task_error_details(&self, task_id: &str) -> Option<String> {
        self.state
            .lock()
            .tasks
            .get(task_id)
            .and_then(|r| r.error_details.clone())
    }

    pub fn incidents(&self) -> Vec<Incident> {
        self.state.lock().incidents.clone()
    }

    pub fn open_incidents(&self, instance_id: &str) -> Vec<Incident> {
        self.state
            .lock()
            .incidents
            .iter()
            .filter(|i| i.process_instance_id == instance_id && !i.resolved)
            .cloned()
            .collect()
    }

    pub fn scheduled_jobs(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = self.state.lock().jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.due);
        jobs
    }

    /// Variables a worker passed when it completed `task_id`
    pub fn completion_variables(&self, task_id: &str) -> Option<Variables> {
        self.state.lock().completions.get(task_id).cloned()
    }

    /// Make the next completion of `task_id` fail as if the engine were unreachable
    pub fn fail_next_completion(&self, task_id: &str) {
        self.state
            .lock()
            .failing_completions
            .insert(task_id.to_string());
    }

    /// Toggle whether engine calls succeed at all
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> EngineResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::Unavailable(
                "in-memory engine switched off".to_string(),
            ))
        }
    }

    fn notify(&self, events: &[ActivityStarted]) {
        if events.is_empty() {
            return;
        }
        let listeners = self.listeners.read().clone();
        for event in events {
            for listener in &listeners {
                listener.on_activity_started(event);
            }
        }
    }
}

#[async_trait]
impl WorkflowEngine for InMemoryWorkflowEngine {
    async fn fetch_and_lock(&self, request: FetchRequest) -> EngineResult<Vec<LockedTask>> {
        self.ensure_available()?;
        let now = Utc::now();
        let lock_expiration = after(now, request.lock_duration)?;

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let mut candidates: Vec<(u64, String)> = state
            .tasks
            .iter()
            .filter(|(_, record)| record.is_fetchable(&request, now))
            .map(|(id, record)| (record.sequence, id.clone()))
            .collect();
        candidates.sort();
        candidates.truncate(request.max_tasks);

        let mut locked = Vec::with_capacity(candidates.len());
        for (_, task_id) in candidates {
            let Some(record) = state.tasks.get_mut(&task_id) else {
                continue;
            };
            record.task.worker_id = Some(request.worker_id.clone());
            record.task.lock_expiration = Some(lock_expiration);

            let task = &record.task;
            let variables = state
                .instances
                .get(&task.process_instance_id)
                .map(|instance| request.variables.select(&instance.variables))
                .unwrap_or_default();

            locked.push(LockedTask {
                id: task.id.clone(),
                process_definition_key: task.process_definition_key.clone(),
                topic: task.topic.clone(),
                process_instance_id: task.process_instance_id.clone(),
                business_key: task.business_key.clone(),
                activity_id: task.activity_id.clone(),
                execution_id: task.execution_id.clone(),
                lock_expiration,
                variables,
                retries: task.retries,
            });
        }

        Ok(locked)
    }

    async fn complete(
        &self,
        task_id: &str,
        worker_id: &str,
        variables: Variables,
    ) -> EngineResult<()> {
        self.ensure_available()?;
        let events = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let record = state.owned_task(task_id, worker_id)?;
            let instance_id = record.task.process_instance_id.clone();
            let activity_id = record.task.activity_id.clone();

            if state.failing_completions.remove(task_id) {
                return Err(EngineError::Unavailable(format!(
                    "completion of {task_id} rejected"
                )));
            }

            state.tasks.remove(task_id);
            state.resolve_incidents(task_id);
            state
                .completions
                .insert(task_id.to_string(), variables.clone());

            let definition = state.definition_of(&instance_id)?;
            if let Some(instance) = state.instances.get_mut(&instance_id) {
                instance.variables.extend(variables);
            }
            let next = definition.position(&activity_id).map_or(usize::MAX, |p| p + 1);
            state.advance(&instance_id, next)?
        };

        debug!(external_task_id = %task_id, worker_id = %worker_id, "✅ ENGINE: External task completed");
        self.notify(&events);
        Ok(())
    }

    async fn handle_business_error(
        &self,
        task_id: &str,
        worker_id: &str,
        error_code: &str,
        error_message: &str,
        variables: Option<Variables>,
    ) -> EngineResult<()> {
        self.ensure_available()?;
        let events = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let record = state.owned_task(task_id, worker_id)?;
            let instance_id = record.task.process_instance_id.clone();
            let activity_id = record.task.activity_id.clone();

            state.tasks.remove(task_id);
            state.resolve_incidents(task_id);

            let definition = state.definition_of(&instance_id)?;
            let boundary = definition
                .find(&activity_id)
                .and_then(|a| a.error_boundary.as_deref())
                .and_then(|target| definition.position(target));

            let instance = state
                .instances
                .get_mut(&instance_id)
                .ok_or_else(|| EngineError::Internal(format!("unknown instance {instance_id}")))?;
            if let Some(variables) = variables {
                instance.variables.extend(variables);
            }
            instance.business_errors.push(error_code.to_string());

            match boundary {
                Some(index) => state.advance(&instance_id, index)?,
                None => {
                    instance.current_activity = None;
                    instance.state = InstanceState::EndedByError {
                        error_code: error_code.to_string(),
                    };
                    Vec::new()
                }
            }
        };

        debug!(
            external_task_id = %task_id,
            error_code = %error_code,
            error_message = %error_message,
            "⚠️ ENGINE: Business error delivered"
        );
        self.notify(&events);
        Ok(())
    }

    async fn handle_failure(
        &self,
        task_id: &str,
        worker_id: &str,
        report: FailureReport,
    ) -> EngineResult<()> {
        self.ensure_available()?;
        let now = Utc::now();
        let lock_expiration = after(now, report.retry_delay)?;

        let mut guard = self.state.lock();
        let state = &mut *guard;

        state.owned_task(task_id, worker_id)?;
        let Some(record) = state.tasks.get_mut(task_id) else {
            return Err(EngineError::TaskNotFound(task_id.to_string()));
        };

        record.task.retries = Some(report.retries);
        record.task.error_message = Some(report.error_message.clone());
        record.task.lock_expiration = Some(lock_expiration);
        record.error_details = Some(report.error_details.clone());

        if report.retries == 0 {
            let task = record.task.clone();
            let already_open = state
                .incidents
                .iter()
                .any(|i| i.external_task_id == task_id && !i.resolved);
            if !already_open {
                warn!(
                    external_task_id = %task_id,
                    process_instance_id = %task.process_instance_id,
                    error_message = %report.error_message,
                    "🚨 ENGINE: Incident raised"
                );
                state.incidents.push(Incident {
                    id: Uuid::new_v4().to_string(),
                    process_instance_id: task.process_instance_id,
                    external_task_id: task.id,
                    activity_id: task.activity_id,
                    message: report.error_message,
                    details: report.error_details,
                    created_at: now,
                    resolved: false,
                });
            }
        }

        Ok(())
    }

    async fn find_task(&self, task_id: &str) -> EngineResult<Option<ExternalTask>> {
        self.ensure_available()?;
        Ok(self
            .state
            .lock()
            .tasks
            .get(task_id)
            .map(|record| record.task.clone()))
    }

    async fn set_variables(&self, execution_id: &str, variables: Variables) -> EngineResult<()> {
        self.ensure_available()?;
        let mut state = self.state.lock();
        let instance = state
            .instances
            .values_mut()
            .find(|i| i.execution_id == execution_id)
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))?;
        instance.variables.extend(variables);
        Ok(())
    }

    async fn schedule_job(&self, due: DateTime<Utc>, payload: JobPayload) -> EngineResult<JobId> {
        self.ensure_available()?;
        let job_id = Uuid::new_v4().to_string();
        self.state.lock().jobs.insert(
            job_id.clone(),
            ScheduledJob {
                id: job_id.clone(),
                due,
                payload: payload.clone(),
                executed: false,
            },
        );

        let state = Arc::clone(&self.state);
        let handlers = Arc::clone(&self.job_handlers);
        let spawned_id = job_id.clone();
        tokio::spawn(async move {
            let wait = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;

            let handler = handlers
                .get(&payload.handler_type)
                .map(|entry| Arc::clone(entry.value()));
            match handler {
                Some(handler) => {
                    if let Err(e) = handler.execute(&payload.configuration).await {
                        warn!(job_id = %spawned_id, error = %e, "⚠️ ENGINE: Job handler failed");
                    }
                }
                None => {
                    warn!(
                        job_id = %spawned_id,
                        handler_type = %payload.handler_type,
                        "⚠️ ENGINE: No handler registered for job type"
                    );
                }
            }

            if let Some(job) = state.lock().jobs.get_mut(&spawned_id) {
                job.executed = true;
            }
        });

        Ok(job_id)
    }

    fn register_job_handler(&self, job_type: &str, handler: Arc<dyn JobHandler>) {
        self.job_handlers.insert(job_type.to_string(), handler);
    }

    fn add_activity_listener(&self, listener: Arc<dyn ActivityListener>) {
        self.listeners.write().push(listener);
    }
}

impl ProcessDefinitionInspector for InMemoryWorkflowEngine {
    fn topic_for_activity(
        &self,
        process_definition_key: &str,
        activity_id: &str,
    ) -> Option<String> {
        self.state
            .lock()
            .definitions
            .get(process_definition_key)
            .and_then(|d| d.find(activity_id))
            .and_then(|a| a.external_topic())
            .map(str::to_string)
    }
}
