use thiserror::Error;

use super::config::{ConfigError, Property};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration mismatch: {reason}")]
    ConfigurationMismatch { reason: String },

    #[error("property not implemented by this ensemble: {0:?}")]
    UnsupportedProperty(Property),

    #[error("ensemble member {member} failed: {reason}")]
    EvaluatorFailure { member: usize, reason: String },

    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    #[error("shutdown left inconsistent state: {reason}")]
    Shutdown { reason: String },

    #[error("failed to spawn worker process: {reason}")]
    Spawn { reason: String },

    #[error("invalid ensemble settings: {source}")]
    Settings {
        #[from]
        source: ConfigError,
    },
}
