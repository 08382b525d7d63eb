//! Error types for the pimsync data model.

use thiserror::Error;

/// A specialized Result type for data model operations.
pub type DataResult<T> = Result<T, DataError>;

/// Errors that can occur while decoding payloads or expanding recurrences.
#[derive(Debug, Error)]
pub enum DataError {
    /// A payload could not be serialized or deserialized.
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// A recurrence rule could not be parsed or expanded.
    #[error("invalid recurrence rule on '{uid}': {message}")]
    InvalidRule {
        /// UID of the component carrying the rule.
        uid: String,
        /// Parser diagnostic from the rule engine.
        message: String,
    },

    /// A timezone identifier could not be resolved.
    #[error("unknown timezone: {0}")]
    UnknownTimeZone(String),
}
