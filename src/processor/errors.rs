//! # Processing Errors
//!
//! What a processor can signal besides success. Everything that is neither a
//! business error nor a retryable failure is terminal and ends in an incident.

use crate::engine::Variables;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Error modelled in the process: routed back into the workflow instead of
/// producing an incident.
///
/// The optional `variables` are set on the process instance together with the
/// error. The optional `result` is only meaningful for async responses, where it
/// is handed back to the caller of `handle_async_input` in place of a regular
/// response value.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Business error '{code}': {message}")]
pub struct BusinessError {
    pub code: String,
    pub message: String,
    pub variables: Option<Variables>,
    pub result: Option<Value>,
}

impl BusinessError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            variables: None,
            result: None,
        }
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }
}

/// Failure that should be retried according to a backoff sequence
///
/// `max_attempts` counts every attempt including the first one. The delays
/// apply to successive retries with the last one repeating.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RetryableFailure {
    pub message: String,
    pub max_attempts: u32,
    pub retry_delays: Vec<Duration>,
    pub cause: Option<anyhow::Error>,
}

impl RetryableFailure {
    pub fn new(message: impl Into<String>, max_attempts: u32, retry_delays: Vec<Duration>) -> Self {
        Self {
            message: message.into(),
            max_attempts,
            retry_delays,
            cause: None,
        }
    }

    /// Single fixed delay between attempts
    pub fn with_fixed_delay(message: impl Into<String>, max_attempts: u32, delay: Duration) -> Self {
        Self::new(message, max_attempts, vec![delay])
    }

    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

/// Everything a processor may return instead of a value
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Business(#[from] BusinessError),
    #[error(transparent)]
    Retryable(#[from] RetryableFailure),
    #[error(transparent)]
    Failure(#[from] anyhow::Error),
}

impl ProcessingError {
    /// Terminal failure from a plain message
    pub fn failure(message: impl Into<String>) -> Self {
        ProcessingError::Failure(anyhow::anyhow!(message.into()))
    }

    pub fn business(code: impl Into<String>, message: impl Into<String>) -> Self {
        ProcessingError::Business(BusinessError::new(code, message))
    }

    /// Message reported to the engine alongside a failure
    pub fn message(&self) -> String {
        match self {
            ProcessingError::Business(error) => error.message.clone(),
            ProcessingError::Retryable(failure) => failure.message.clone(),
            ProcessingError::Failure(error) => error.to_string(),
        }
    }

    /// Diagnostic detail for incidents: the whole cause chain, plus a backtrace
    /// when one was captured.
    pub fn incident_details(&self) -> String {
        match self {
            ProcessingError::Business(error) => format!("{error:?}"),
            ProcessingError::Retryable(failure) => match &failure.cause {
                Some(cause) => format!("{}\n\nCaused by: {cause:?}", failure.message),
                None => failure.message.clone(),
            },
            ProcessingError::Failure(error) => format!("{error:?}"),
        }
    }
}

/// Render any error the way incident details are rendered for processor failures
pub fn incident_details_of(error: &(dyn std::error::Error + 'static)) -> String {
    let mut details = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        details.push_str("\n\nCaused by: ");
        details.push_str(&cause.to_string());
        source = cause.source();
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use serde_json::json;

    #[test]
    fn test_business_error_builder() {
        let mut variables = Variables::new();
        variables.insert("reason".to_string(), json!("declined"));

        let error = BusinessError::new("payment_declined", "card declined")
            .with_variables(variables.clone())
            .with_result(json!({"accepted": false}));

        assert_eq!(error.code, "payment_declined");
        assert_eq!(error.variables, Some(variables));
        assert_eq!(error.result, Some(json!({"accepted": false})));
        assert_eq!(
            error.to_string(),
            "Business error 'payment_declined': card declined"
        );
    }

    #[test]
    fn test_failure_details_include_cause_chain() {
        let root: Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        let error: ProcessingError = root.context("calling billing service").unwrap_err().into();

        assert_eq!(error.message(), "calling billing service");
        let details = error.incident_details();
        assert!(details.contains("calling billing service"));
        assert!(details.contains("connection refused"));
    }

    #[test]
    fn test_retryable_failure_details() {
        let failure = RetryableFailure::with_fixed_delay("gateway busy", 3, Duration::from_secs(1))
            .with_cause(anyhow::anyhow!("503 Service Unavailable"));
        let error = ProcessingError::from(failure);

        assert_eq!(error.message(), "gateway busy");
        assert!(error.incident_details().contains("503 Service Unavailable"));
    }

    #[test]
    fn test_incident_details_of_std_error() {
        #[derive(Debug, Error)]
        #[error("outer")]
        struct Outer(#[source] std::io::Error);

        let error = Outer(std::io::Error::new(std::io::ErrorKind::Other, "inner"));
        let details = incident_details_of(&error);
        assert!(details.starts_with("outer"));
        assert!(details.contains("Caused by: inner"));
    }
}
