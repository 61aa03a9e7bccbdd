#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # External Task Handler
//!
//! Dispatch engine connecting a workflow engine's external tasks to
//! application-supplied processors.
//!
//! ## Overview
//!
//! Applications register a processor per `(process definition key, topic)`.
//! Whenever the engine announces that an instance entered an activity bound to
//! a registered topic, and periodically for every registration, the dispatcher
//! leases the matching tasks, runs the processor and reports the outcome back:
//! completion, a modelled business error, a retry with backoff, or an incident.
//!
//! Async registrations split processing in two: a request processor sends work
//! elsewhere, and the response is delivered later through
//! [`ExternalTaskDispatcher::handle_async_input`] using the task id as the
//! correlation id. A watchdog job raises an incident when no response arrives
//! in time.
//!
//! ## Module Organization
//!
//! - [`registry`] - Registration table of processing contracts
//! - [`processor`] - Processor traits, contexts and the processing error taxonomy
//! - [`orchestration`] - The dispatcher: leasing, outcome translation, async correlation, watchdog
//! - [`engine`] - Workflow engine port and an in-memory engine
//! - [`host`] - After-commit and asynchronous execution primitives
//! - [`resilience`] - Retry policy
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust
//! use external_task_handler::config::HandlerConfig;
//! use external_task_handler::engine::{ActivityDefinition, InMemoryWorkflowEngine, ProcessDefinition, Variables};
//! use external_task_handler::host::TokioExecutionHost;
//! use external_task_handler::processor::sync_processor;
//! use external_task_handler::registry::RegistrationOptions;
//! use external_task_handler::ExternalTaskDispatcher;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let engine = Arc::new(InMemoryWorkflowEngine::new());
//! engine.deploy(
//!     ProcessDefinition::new("invoice").activity(ActivityDefinition::service_task("Send", "send-invoice")),
//! );
//!
//! let dispatcher = ExternalTaskDispatcher::new(
//!     engine.clone(),
//!     engine.clone(),
//!     Arc::new(TokioExecutionHost::current(8)),
//!     HandlerConfig::default(),
//! )?;
//! dispatcher.attach();
//!
//! dispatcher.register_sync(
//!     "invoice",
//!     "send-invoice",
//!     sync_processor(|_context| async move {
//!         let mut variables = Variables::new();
//!         variables.insert("sent".to_string(), json!(true));
//!         Ok(variables)
//!     }),
//!     RegistrationOptions::new(),
//! )?;
//! # Ok::<(), external_task_handler::HandlerError>(())
//! # }).unwrap();
//! ```

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod host;
pub mod logging;
pub mod orchestration;
pub mod processor;
pub mod registry;
pub mod resilience;

pub use config::{ConfigManager, HandlerConfig};
pub use constants::DispatchOutcome;
pub use engine::{Variables, WorkflowEngine};
pub use error::{HandlerError, Result};
pub use host::{ExecutionHost, TokioExecutionHost};
pub use orchestration::{AsyncInputError, ExternalTaskDispatcher};
pub use processor::{BusinessError, ProcessingError, RetryableFailure};
pub use registry::{AsyncRegistrationOptions, RegistrationOptions};
