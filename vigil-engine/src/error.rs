//! Error types for the monitoring engine

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Error types for the monitoring engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Referenced object does not exist
    #[error("Object '{0}' not found")]
    ObjectNotFound(String),

    /// Object with this name is already registered
    #[error("Object '{0}' already exists")]
    ObjectExists(String),

    /// Registration-time validation failure; `path` names the offending field
    #[error("Validation error at '{path}': {reason}")]
    Validation { path: String, reason: String },

    /// Check command invocation failed
    #[error("Check execution failed: {0}")]
    CheckExecution(String),

    /// External command line could not be parsed or applied
    #[error("External command error: {0}")]
    ExternalCommand(String),

    /// Operator removal of a downtime owned by a scheduled downtime
    #[error("Downtime '{downtime}' is owned by scheduled downtime '{owner}'")]
    DowntimeOwned { downtime: String, owner: String },

    /// Malformed cluster message
    #[error("Malformed cluster message: {0}")]
    Message(String),

    /// Time period range definition could not be parsed
    #[error("Invalid time range '{range}': {reason}")]
    InvalidTimeRange { range: String, reason: String },

    /// Performance data could not be parsed
    #[error("Invalid performance data '{0}'")]
    InvalidPerfdata(String),
}

impl EngineError {
    /// Shorthand for a validation error
    pub fn validation(path: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Validation {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
