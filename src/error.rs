//! Error types for the observation engine.

use thiserror::Error;

/// Main error type for observer registration and dispatch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ObserveError {
    #[error("Observer method {method} could not be resolved for '{key}'")]
    InvalidObserverTarget { key: String, method: String },

    #[error("Immediate observers must observe local properties only, not '{0}'")]
    IllegalImmediateObserverPath(String),

    #[error("Callback failed for '{key}': {message}")]
    Callback { key: String, message: String },

    #[error("Invalid property path: {0:?}")]
    InvalidPath(String),

    #[error("Property set failed: object in path '{path}' could not be found")]
    PathNotFound { path: String },

    #[error("end_property_changes called without a matching begin")]
    UnbalancedBatch,
}

impl ObserveError {
    /// Wrap an arbitrary error raised by user code running for `key`.
    pub fn callback(key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ObserveError::Callback {
            key: key.into(),
            message: err.to_string(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ObserveError>;
