//! # External Task Orchestration
//!
//! The dispatcher connecting workflow-engine external tasks to registered
//! processors and translating their outcomes back into engine calls.
//!
//! ## Architecture
//!
//! ```text
//! activity started ──┐
//!                    ├─ after_commit ─ run_async ─▶ fetch_and_lock(key, topic)
//! sweep (interval) ──┘                                   │ one run_async per task
//!                                                        ▼
//!                                         registered contract (sync / async request)
//!                                                        │
//!             complete · business error · retry (re-lease after delay) · incident
//!
//! async response ─▶ handle_async_input(task id) ─▶ response processor ─▶ complete
//! watchdog job   ─▶ timeout check ─▶ incident when the lease is still the same
//! ```
//!
//! ## Core Components
//!
//! - **fetch_lock_dispatch**: event- and sweep-triggered leasing, sweeper lifecycle
//! - **outcome_translator**: runs the contract for one leased task and reports the result
//! - **async_correlation**: `handle_async_input` for out-of-band responses
//! - **timeout_watchdog**: canonical watchdog job payload and the firing checks
//! - **stats**: lock-free dispatch counters
//!
//! ## Usage
//!
//! ```rust
//! use external_task_handler::config::HandlerConfig;
//! use external_task_handler::engine::{ActivityDefinition, InMemoryWorkflowEngine, ProcessDefinition, Variables};
//! use external_task_handler::host::TokioExecutionHost;
//! use external_task_handler::orchestration::ExternalTaskDispatcher;
//! use external_task_handler::processor::sync_processor;
//! use external_task_handler::registry::RegistrationOptions;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let engine = Arc::new(InMemoryWorkflowEngine::new());
//! engine.deploy(ProcessDefinition::new("order").activity(ActivityDefinition::service_task("Charge", "charge")));
//!
//! let dispatcher = ExternalTaskDispatcher::new(
//!     engine.clone(),
//!     engine.clone(),
//!     Arc::new(TokioExecutionHost::current(4)),
//!     HandlerConfig::default(),
//! )
//! .unwrap();
//! dispatcher.attach();
//! dispatcher
//!     .register_sync(
//!         "order",
//!         "charge",
//!         sync_processor(|_context| async move { Ok(Variables::new()) }),
//!         RegistrationOptions::new(),
//!     )
//!     .unwrap();
//!
//! engine.start_process_instance("order", None, Variables::new()).unwrap();
//! # });
//! ```

pub mod async_correlation;
pub mod fetch_lock_dispatch;
pub mod outcome_translator;
pub mod stats;
pub mod timeout_watchdog;

pub use async_correlation::AsyncInputError;
pub use fetch_lock_dispatch::SweeperHandle;
pub use stats::{DispatchStats, DispatchStatsSnapshot};
pub use timeout_watchdog::{WatchdogError, WatchdogJob, WatchdogVerdict};

use crate::config::{ConfigurationError, HandlerConfig};
use crate::constants::{operations, ASYNC_TIMEOUT_JOB_TYPE};
use crate::engine::{
    ActivityListener, ActivityStarted, JobHandler, ProcessDefinitionInspector, WorkflowEngine,
};
use crate::error::Result;
use crate::host::ExecutionHost;
use crate::processor::{AsyncRequestProcessor, AsyncResponseProcessor, SyncProcessor};
use crate::registry::{
    AsyncRegistrationOptions, ProcessingContract, Registration, RegistrationOptions,
    RegistrationTable,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

/// Routes leased external tasks to registered processors
///
/// Cheap to clone; clones share the registration table, settings and stats.
#[derive(Clone)]
pub struct ExternalTaskDispatcher {
    inner: Arc<DispatcherShared>,
}

struct DispatcherShared {
    engine: Arc<dyn WorkflowEngine>,
    inspector: Arc<dyn ProcessDefinitionInspector>,
    host: Arc<dyn ExecutionHost>,
    registry: Arc<RegistrationTable>,
    config: RwLock<HandlerConfig>,
    stats: DispatchStats,
}

impl std::fmt::Debug for ExternalTaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalTaskDispatcher")
            .field("worker_id", &self.inner.config.read().worker_id)
            .field("registrations", &self.inner.registry.len())
            .finish()
    }
}

impl ExternalTaskDispatcher {
    pub fn new(
        engine: Arc<dyn WorkflowEngine>,
        inspector: Arc<dyn ProcessDefinitionInspector>,
        host: Arc<dyn ExecutionHost>,
        config: HandlerConfig,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            worker_id = %config.worker_id,
            lock_timeout_ms = config.default_lock_timeout_ms,
            "🚀 DISPATCHER: Created"
        );
        Ok(Self {
            inner: Arc::new(DispatcherShared {
                engine,
                inspector,
                host,
                registry: Arc::new(RegistrationTable::new()),
                config: RwLock::new(config),
                stats: DispatchStats::new(),
            }),
        })
    }

    /// Subscribe to activity-start notifications and handle due watchdog jobs
    ///
    /// The engine only holds a weak link: once every clone of the dispatcher
    /// is dropped, notifications and watchdog jobs are ignored.
    pub fn attach(&self) {
        let link = Arc::new(AttachedDispatcher {
            inner: Arc::downgrade(&self.inner),
        });
        self.inner
            .engine
            .register_job_handler(ASYNC_TIMEOUT_JOB_TYPE, link.clone());
        self.inner.engine.add_activity_listener(link);
        info!(
            job_type = ASYNC_TIMEOUT_JOB_TYPE,
            "🔗 DISPATCHER: Attached to workflow engine"
        );
    }

    pub fn register_sync(
        &self,
        definition_key: &str,
        topic: &str,
        processor: Arc<dyn SyncProcessor>,
        options: RegistrationOptions,
    ) -> Result<Arc<Registration>> {
        Ok(self.inner.registry.register(
            definition_key,
            topic,
            ProcessingContract::Sync(processor),
            options,
        )?)
    }

    pub fn register_async(
        &self,
        definition_key: &str,
        topic: &str,
        request: Arc<dyn AsyncRequestProcessor>,
        response: Arc<dyn AsyncResponseProcessor>,
        options: AsyncRegistrationOptions,
    ) -> Result<Arc<Registration>> {
        Ok(self.inner.registry.register(
            definition_key,
            topic,
            ProcessingContract::Async {
                request,
                response,
                response_timeout: options.response_timeout,
                response_timeout_message: options.response_timeout_message,
            },
            options.lease,
        )?)
    }

    /// Worker identity used from the next engine call on
    pub fn set_worker_id(&self, worker_id: impl Into<String>) {
        let worker_id = worker_id.into();
        info!(worker_id = %worker_id, "🔧 DISPATCHER: Worker identity set");
        self.inner.config.write().worker_id = worker_id;
    }

    /// Lock timeout for registrations that do not set their own
    ///
    /// Must be at least one millisecond.
    pub fn set_default_lock_timeout(&self, lock_timeout: Duration) -> Result<()> {
        let millis = u64::try_from(lock_timeout.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return Err(ConfigurationError::invalid(
                "default_lock_timeout_ms",
                "must be greater than zero",
            )
            .into());
        }
        info!(lock_timeout_ms = millis, "🔧 DISPATCHER: Default lock timeout set");
        self.inner.config.write().default_lock_timeout_ms = millis;
        Ok(())
    }

    pub fn worker_id(&self) -> String {
        self.inner.config.read().worker_id.clone()
    }

    /// Snapshot of the current settings
    pub fn config(&self) -> HandlerConfig {
        self.inner.config.read().clone()
    }

    pub fn registry(&self) -> &Arc<RegistrationTable> {
        &self.inner.registry
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.inner.stats.snapshot()
    }
}

/// What the engine holds on to after [`ExternalTaskDispatcher::attach`]
struct AttachedDispatcher {
    inner: Weak<DispatcherShared>,
}

impl AttachedDispatcher {
    fn dispatcher(&self) -> Option<ExternalTaskDispatcher> {
        self.inner
            .upgrade()
            .map(|inner| ExternalTaskDispatcher { inner })
    }
}

impl ActivityListener for AttachedDispatcher {
    fn on_activity_started(&self, event: &ActivityStarted) {
        if let Some(dispatcher) = self.dispatcher() {
            dispatcher.handle_activity_started(event);
        }
    }
}

#[async_trait]
impl JobHandler for AttachedDispatcher {
    async fn execute(&self, configuration: &str) -> anyhow::Result<()> {
        let Some(dispatcher) = self.dispatcher() else {
            debug!(
                operation = operations::TIMEOUT_WATCHDOG,
                "⏰ DISPATCHER: Dispatcher dropped, ignoring watchdog job"
            );
            return Ok(());
        };
        let verdict = dispatcher.fire_watchdog(configuration).await?;
        debug!(
            operation = operations::TIMEOUT_WATCHDOG,
            verdict = ?verdict,
            "⏰ DISPATCHER: Watchdog job handled"
        );
        Ok(())
    }
}
