//! # Registrations
//!
//! A registration binds a `(process definition key, topic)` pair to the
//! contract that processes its tasks, together with the lease options used when
//! fetching them.

use super::RegistrationError;
use crate::constants::KEY_SEPARATOR;
use crate::engine::VariableFilter;
use crate::processor::{AsyncRequestProcessor, AsyncResponseProcessor, SyncProcessor};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Composite lookup key of a registration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationKey {
    pub definition_key: String,
    pub topic: String,
}

impl RegistrationKey {
    /// Validated key. Both parts must be non-empty and free of the separator so
    /// that distinct pairs never render to the same key string.
    pub fn new(
        definition_key: impl Into<String>,
        topic: impl Into<String>,
    ) -> Result<Self, RegistrationError> {
        let definition_key = definition_key.into();
        let topic = topic.into();

        for (field, value) in [("process definition key", &definition_key), ("topic", &topic)] {
            if value.trim().is_empty() {
                return Err(RegistrationError::InvalidKey(format!("{field} must not be empty")));
            }
            if value.contains(KEY_SEPARATOR) {
                return Err(RegistrationError::InvalidKey(format!(
                    "{field} '{value}' must not contain '{KEY_SEPARATOR}'"
                )));
            }
        }

        Ok(Self {
            definition_key,
            topic,
        })
    }

    /// Key for a leased task. Tasks come from the engine and are not validated.
    pub(crate) fn for_task(definition_key: &str, topic: &str) -> Self {
        Self {
            definition_key: definition_key.to_string(),
            topic: topic.to_string(),
        }
    }

    pub fn key_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.definition_key, KEY_SEPARATOR, self.topic)
    }
}

/// How tasks of a registration are processed
#[derive(Clone)]
pub enum ProcessingContract {
    Sync(Arc<dyn SyncProcessor>),
    Async {
        request: Arc<dyn AsyncRequestProcessor>,
        response: Arc<dyn AsyncResponseProcessor>,
        /// Static deadline for the response, measured from the request
        response_timeout: Option<Duration>,
        /// Incident message used when the deadline passes
        response_timeout_message: Option<String>,
    },
}

impl ProcessingContract {
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingContract::Sync(_) => "sync",
            ProcessingContract::Async { .. } => "async",
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self, ProcessingContract::Async { .. })
    }
}

impl fmt::Debug for ProcessingContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingContract::Sync(_) => f.write_str("Sync"),
            ProcessingContract::Async {
                response_timeout,
                response_timeout_message,
                ..
            } => f
                .debug_struct("Async")
                .field("response_timeout", response_timeout)
                .field("response_timeout_message", response_timeout_message)
                .finish(),
        }
    }
}

/// Registered contract plus its lease options
#[derive(Debug, Clone)]
pub struct Registration {
    pub key: RegistrationKey,
    /// Overrides the worker's default lock timeout
    pub lock_timeout: Option<Duration>,
    pub variables: VariableFilter,
    pub contract: ProcessingContract,
}

impl Registration {
    pub fn effective_lock_timeout(&self, default: Duration) -> Duration {
        self.lock_timeout.unwrap_or(default)
    }
}

/// Lease options for a sync registration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationOptions {
    pub lock_timeout: Option<Duration>,
    pub variables: VariableFilter,
}

impl RegistrationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = Some(lock_timeout);
        self
    }

    /// Lease tasks without fetching any variables
    pub fn fetch_no_variables(mut self) -> Self {
        self.variables = VariableFilter::None;
        self
    }

    pub fn fetch_variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables = VariableFilter::Names(names.into_iter().map(Into::into).collect());
        self
    }
}

/// Lease and response options for an async registration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsyncRegistrationOptions {
    pub lease: RegistrationOptions,
    pub response_timeout: Option<Duration>,
    pub response_timeout_message: Option<String>,
}

impl AsyncRegistrationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lease = self.lease.with_lock_timeout(lock_timeout);
        self
    }

    pub fn fetch_no_variables(mut self) -> Self {
        self.lease = self.lease.fetch_no_variables();
        self
    }

    pub fn fetch_variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lease = self.lease.fetch_variables(names);
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    pub fn with_response_timeout_message(mut self, message: impl Into<String>) -> Self {
        self.response_timeout_message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_renders_with_separator() {
        let key = RegistrationKey::new("order", "charge").unwrap();
        assert_eq!(key.key_string(), "order#charge");
    }

    #[test]
    fn test_key_rejects_separator_and_empty_parts() {
        assert!(matches!(
            RegistrationKey::new("or#der", "charge"),
            Err(RegistrationError::InvalidKey(_))
        ));
        assert!(matches!(
            RegistrationKey::new("order", "a#b"),
            Err(RegistrationError::InvalidKey(_))
        ));
        assert!(matches!(
            RegistrationKey::new("", "charge"),
            Err(RegistrationError::InvalidKey(_))
        ));
        assert!(matches!(
            RegistrationKey::new("order", "  "),
            Err(RegistrationError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_options_builders() {
        let options = RegistrationOptions::new()
            .with_lock_timeout(Duration::from_secs(5))
            .fetch_variables(["amount", "currency"]);
        assert_eq!(options.lock_timeout, Some(Duration::from_secs(5)));
        assert_eq!(
            options.variables,
            VariableFilter::Names(vec!["amount".to_string(), "currency".to_string()])
        );

        let options = AsyncRegistrationOptions::new()
            .fetch_no_variables()
            .with_response_timeout(Duration::from_secs(3))
            .with_response_timeout_message("no answer");
        assert_eq!(options.lease.variables, VariableFilter::None);
        assert_eq!(options.response_timeout, Some(Duration::from_secs(3)));
        assert_eq!(options.response_timeout_message.as_deref(), Some("no answer"));
    }
}
