use serde::Serialize;
use thiserror::Error;

use crate::sources::traits::ServiceError;

/// Unified error type for the file-tree subsystem.
///
/// Serializes as `{"type": ..., "details": {...}}` so a UI layer can
/// branch on the failure kind. Lookup misses are never represented here.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum TreeError {
    #[error("Transport error during {operation}: {message}")]
    Transport { message: String, operation: String },

    #[error("Timed out after {seconds}s during {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Decoration error: {message}")]
    Decoration { message: String },

    #[error("Config error: {message}")]
    Config { message: String },

    #[error("IO error: {message}")]
    Io { message: String },
}

impl TreeError {
    /// Create a Transport error with operation context
    pub fn transport(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            operation: operation.into(),
        }
    }

    /// Create a Timeout error for an operation that ran out of time
    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// Create a Decoration error
    pub fn decoration(message: impl Into<String>) -> Self {
        Self::Decoration {
            message: message.into(),
        }
    }

    /// Create a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an IO error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (caller can retry the operation)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } | Self::Io { .. } => true,
            // Worker panics and bad config won't change on retry
            Self::Decoration { .. } | Self::Config { .. } => false,
        }
    }
}

impl From<ServiceError> for TreeError {
    fn from(err: ServiceError) -> Self {
        TreeError::transport(err.message, err.operation)
    }
}

impl From<std::io::Error> for TreeError {
    fn from(err: std::io::Error) -> Self {
        TreeError::io(err.to_string())
    }
}

impl From<serde_json::Error> for TreeError {
    fn from(err: serde_json::Error) -> Self {
        TreeError::config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for TreeError {
    fn from(err: tokio::task::JoinError) -> Self {
        TreeError::decoration(format!("Task join error: {err}"))
    }
}

impl From<TreeError> for String {
    fn from(err: TreeError) -> Self {
        err.to_string()
    }
}
