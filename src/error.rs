//! Error types for the feed synchronization core.

use crate::types::StorePath;
use thiserror::Error;

/// Main error type for hearth operations.
///
/// Late events on a disposed subscription and double disposal are not
/// represented here: both are expected outcomes and are absorbed silently.
#[derive(Debug, Error)]
pub enum HearthError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed feed or article record. The record is skipped.
    #[error("Invalid record at {path}: {reason}")]
    Validation { path: String, reason: String },

    /// Opening or reading a remote subscription failed.
    #[error("Subscription to {path} failed: {reason}")]
    Subscription { path: StorePath, reason: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl HearthError {
    pub(crate) fn validation(path: impl Into<String>, reason: impl Into<String>) -> Self {
        HearthError::Validation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that leave a feed unloaded but are safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HearthError::Subscription { .. } | HearthError::Remote(_))
    }
}

impl From<serde_json::Error> for HearthError {
    fn from(e: serde_json::Error) -> Self {
        HearthError::Serialization(e.to_string())
    }
}

/// Result type for hearth operations.
pub type Result<T> = std::result::Result<T, HearthError>;
