// src/error.rs
use thiserror::Error;

/// Failures that stop a whole reconciliation run. Everything smaller (one
/// team/day, one slot, one upsert) is absorbed into the run's warnings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("Reconciliation already running: lock '{job}' is held by another process")]
    LockContention { job: String },
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: &'static str, message: String },
}

impl ConfigError {
    pub fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            name,
            message: message.into(),
        }
    }
}

impl From<ConfigError> for ReconcileError {
    fn from(e: ConfigError) -> Self {
        ReconcileError::Configuration(e.to_string())
    }
}
