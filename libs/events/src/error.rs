//! Error types for event handling.

use thiserror::Error;

/// Errors that can occur when building or encoding events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The event kind string is unknown.
    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),

    /// A required envelope field was not supplied to the builder.
    #[error("envelope field '{0}' is required")]
    MissingField(&'static str),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}
