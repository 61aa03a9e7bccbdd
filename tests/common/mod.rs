//! Shared fixtures for dispatcher integration tests.

#![allow(dead_code)]

pub mod strategies;

use external_task_handler::config::HandlerConfig;
use external_task_handler::engine::{InMemoryWorkflowEngine, ProcessDefinition, Variables};
use external_task_handler::host::{ExecutionHost, HostAction, TokioExecutionHost};
use external_task_handler::ExternalTaskDispatcher;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const WAIT: Duration = Duration::from_secs(5);

/// Engine, host and an attached dispatcher wired together
pub struct Scenario {
    pub engine: Arc<InMemoryWorkflowEngine>,
    pub host: TokioExecutionHost,
    pub dispatcher: ExternalTaskDispatcher,
}

impl Scenario {
    pub fn new(definition: ProcessDefinition) -> Self {
        Self::with_config(definition, test_config())
    }

    pub fn with_config(definition: ProcessDefinition, config: HandlerConfig) -> Self {
        let engine = Arc::new(InMemoryWorkflowEngine::new());
        engine.deploy(definition);

        let host = TokioExecutionHost::current(config.max_concurrent_processing);
        let dispatcher = ExternalTaskDispatcher::new(
            engine.clone(),
            engine.clone(),
            Arc::new(host.clone()),
            config,
        )
        .expect("valid test config");
        dispatcher.attach();

        Self {
            engine,
            host,
            dispatcher,
        }
    }

    pub fn start(&self, definition_key: &str, variables: Variables) -> String {
        self.engine
            .start_process_instance(definition_key, Some("bk-1"), variables)
            .expect("instance starts")
    }

    pub async fn settle(&self) {
        assert!(self.host.wait_idle(WAIT).await, "host did not become idle");
    }
}

/// Host whose `after_commit` actions wait until [`CommitGatedHost::commit`]
#[derive(Clone)]
pub struct CommitGatedHost {
    inner: TokioExecutionHost,
    pending: Arc<Mutex<Vec<(&'static str, HostAction)>>>,
}

impl CommitGatedHost {
    pub fn new(inner: TokioExecutionHost) -> Self {
        Self {
            inner,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Commit the current unit of work, releasing every deferred action
    pub fn commit(&self) {
        let actions: Vec<_> = self.pending.lock().drain(..).collect();
        for (label, action) in actions {
            self.inner.after_commit(label, action);
        }
    }
}

impl ExecutionHost for CommitGatedHost {
    fn after_commit(&self, label: &'static str, action: HostAction) {
        self.pending.lock().push((label, action));
    }

    fn run_async(&self, label: &'static str, action: HostAction) {
        self.inner.run_async(label, action);
    }

    fn run_after(&self, delay: Duration, label: &'static str, action: HostAction) {
        self.inner.run_after(delay, label, action);
    }
}

pub fn test_config() -> HandlerConfig {
    HandlerConfig {
        worker_id: "test-worker".to_string(),
        default_retry_delay_ms: 20,
        ..HandlerConfig::default()
    }
}

pub fn vars(pairs: &[(&str, serde_json::Value)]) -> Variables {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll an async `check` until it holds or `timeout` elapses
pub async fn wait_until_async<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Records every invocation of a processor
#[derive(Debug, Clone, Default)]
pub struct CallRecorder {
    calls: Arc<AtomicUsize>,
    instants: Arc<Mutex<Vec<Instant>>>,
    retries_seen: Arc<Mutex<Vec<Option<u32>>>>,
}

impl CallRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, retries: Option<u32>) -> usize {
        self.instants.lock().push(Instant::now());
        self.retries_seen.lock().push(retries);
        self.calls.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn retries_seen(&self) -> Vec<Option<u32>> {
        self.retries_seen.lock().clone()
    }

    /// Time between consecutive invocations
    pub fn gaps(&self) -> Vec<Duration> {
        let instants = self.instants.lock();
        instants.windows(2).map(|w| w[1] - w[0]).collect()
    }
}
