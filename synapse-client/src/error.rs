//! Error types for the remote client and the watch binary.

use crate::config::ConfigError;
use synapse_core::{SyncError, ValidationError};

/// Failure to complete a request. HTTP-level failures are not errors; they
/// come back as [`synapse_core::ApiResult::Failure`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
    #[error("Payload encryption failed: {0}")]
    Encryption(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Config error: {0}")]
    Config(String),
}

impl ClientError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                after_ms: timeout_ms,
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<ClientError> for SyncError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Transport(message) => SyncError::Transport { message },
            ClientError::Timeout { after_ms } => SyncError::Timeout { after_ms },
            ClientError::Serde(err) => SyncError::Decode {
                message: err.to_string(),
            },
            ClientError::InvalidResponse(message) => SyncError::Decode { message },
            ClientError::Encryption(reason) => SyncError::Encryption { reason },
            ClientError::Validation(err) => SyncError::Validation(err),
            ClientError::Config(message) => SyncError::Transport { message },
        }
    }
}

/// Errors that stop the `synapse-watch` binary.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("Failed to install logging: {0}")]
    Logging(String),
}
