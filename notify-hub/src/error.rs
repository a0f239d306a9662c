//! Crate-wide error types.

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Dispatch queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    #[error("Notification manager is stopped")]
    Stopped,

    #[error("Provider {channel} failed: {message}")]
    Provider { channel: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn provider(channel: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provider {
            channel: channel.into(),
            message: msg.into(),
        }
    }

    /// Whether the error comes from a malformed request rather than the runtime.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
