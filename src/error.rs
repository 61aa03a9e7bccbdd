//! Error types for the external task handler.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::engine::EngineError;
use crate::orchestration::{AsyncInputError, WatchdogError};
use crate::registry::RegistrationError;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Async input error: {0}")]
    AsyncInput(#[from] AsyncInputError),
    #[error("Watchdog error: {0}")]
    Watchdog(#[from] WatchdogError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HandlerError>;
