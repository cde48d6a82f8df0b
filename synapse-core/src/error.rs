//! Error types for the live-state layer.
//!
//! `SyncError` is `Clone` because one in-flight fetch is shared by every
//! subscriber that joins it, and each of them receives the same outcome.

use thiserror::Error;

/// Client-side validation errors, raised before any network call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ValidationError {
    pub fn required(field: impl Into<String>) -> Self {
        Self::RequiredFieldMissing {
            field: field.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of a fetch, stream or mutation, as seen by the cache and its
/// subscribers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// Network unreachable, DNS failure, connection reset.
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The server answered but reported failure.
    #[error("{message}")]
    Application { status: u16, message: String },

    #[error("Session expired")]
    Unauthorized,

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid response: {message}")]
    Decode { message: String },

    #[error("Payload encryption failed: {reason}")]
    Encryption { reason: String },

    /// The fetcher panicked while building or driving its future.
    #[error("Fetcher failed: {reason}")]
    Fetcher { reason: String },

    #[error("Cached value for {key} has a different type")]
    TypeMismatch { key: String },

    #[error("Stream error: {message}")]
    Stream { message: String },
}

impl SyncError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn application(status: u16, message: impl Into<String>) -> Self {
        Self::Application {
            status,
            message: message.into(),
        }
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    /// True for failures that never reached the server.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
