//! # Registration Table
//!
//! Process-lifetime table of `(process definition key, topic)` registrations.
//!
//! ## Overview
//!
//! Registrations are added at application start and looked up on every
//! dispatch. The table is backed by a `DashMap`, so lookups from concurrent
//! dispatches never block each other and registrations made while dispatching
//! has already begun are safe.
//!
//! Keys render as `definitionKey#topic`. Keys or topics that are empty or
//! contain `#` are rejected, and so is registering the same pair twice.
//!
//! ## Usage
//!
//! ```rust
//! use external_task_handler::registry::{ProcessingContract, RegistrationOptions, RegistrationTable};
//! use external_task_handler::processor::sync_processor;
//! use external_task_handler::engine::Variables;
//!
//! let table = RegistrationTable::new();
//! let processor = sync_processor(|_context| async move { Ok(Variables::new()) });
//!
//! table
//!     .register("order", "charge", ProcessingContract::Sync(processor), RegistrationOptions::new())
//!     .unwrap();
//! assert!(table.lookup("order", "charge").is_some());
//! ```

pub mod registration;

pub use registration::{
    AsyncRegistrationOptions, ProcessingContract, Registration, RegistrationKey,
    RegistrationOptions,
};
pub use crate::engine::VariableFilter;

use crate::constants::operations;
use crate::logging::log_registry_operation;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("Invalid registration key: {0}")]
    InvalidKey(String),

    #[error("Already registered: {0}")]
    AlreadyRegistered(String),
}

/// Statistics about registered contracts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_registrations: usize,
    pub sync_registrations: usize,
    pub async_registrations: usize,
}

/// Concurrent table of registrations
#[derive(Debug, Default)]
pub struct RegistrationTable {
    registrations: DashMap<RegistrationKey, Arc<Registration>>,
}

impl RegistrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contract for `(definition_key, topic)`
    pub fn register(
        &self,
        definition_key: &str,
        topic: &str,
        contract: ProcessingContract,
        options: RegistrationOptions,
    ) -> Result<Arc<Registration>, RegistrationError> {
        let key = RegistrationKey::new(definition_key, topic)?;
        let registration = Arc::new(Registration {
            key: key.clone(),
            lock_timeout: options.lock_timeout,
            variables: options.variables,
            contract,
        });

        match self.registrations.entry(key) {
            Entry::Occupied(entry) => {
                log_registry_operation(
                    operations::REGISTER,
                    &entry.key().key_string(),
                    "rejected",
                    Some("duplicate registration"),
                );
                Err(RegistrationError::AlreadyRegistered(entry.key().key_string()))
            }
            Entry::Vacant(entry) => {
                log_registry_operation(
                    operations::REGISTER,
                    &entry.key().key_string(),
                    registration.contract.kind(),
                    None,
                );
                entry.insert(Arc::clone(&registration));
                Ok(registration)
            }
        }
    }

    pub fn lookup(&self, definition_key: &str, topic: &str) -> Option<Arc<Registration>> {
        let key = RegistrationKey::for_task(definition_key, topic);
        let found = self
            .registrations
            .get(&key)
            .map(|entry| Arc::clone(entry.value()));
        if found.is_none() {
            debug!(registration_key = %key, "🔍 REGISTRY: No registration found");
        }
        found
    }

    pub fn contains(&self, definition_key: &str, topic: &str) -> bool {
        self.registrations
            .contains_key(&RegistrationKey::for_task(definition_key, topic))
    }

    /// Snapshot of all registrations, ordered by key
    pub fn registrations(&self) -> Vec<Arc<Registration>> {
        let mut all: Vec<Arc<Registration>> = self
            .registrations
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for entry in self.registrations.iter() {
            stats.total_registrations += 1;
            if entry.value().contract.is_async() {
                stats.async_registrations += 1;
            } else {
                stats.sync_registrations += 1;
            }
        }
        stats
    }
}
