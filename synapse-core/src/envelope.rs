//! Response envelope normalization.
//!
//! The backend answers either with the envelope
//! `{ success, data?, message?, error? }` or, on older routes, with a bare
//! JSON payload (`{"tactics": [...]}`) or a bare error (`{"error": "..."}`).
//! Both shapes are folded into [`ApiResult`].

use crate::error::{SyncError, SyncResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire shape of the standard response envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiEnvelope {
    /// Merge `message` and `error` into one user-facing string.
    pub fn user_message(&self) -> Option<String> {
        merge_messages(self.message.as_deref(), self.error.as_deref())
    }
}

/// Outcome of a request that reached the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResult<T> {
    Success { data: T },
    Failure { status: u16, message: String },
}

impl<T> ApiResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { status, .. } => Some(*status),
        }
    }

    pub fn map<U, F>(self, f: F) -> ApiResult<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Success { data } => ApiResult::Success { data: f(data) },
            Self::Failure { status, message } => ApiResult::Failure { status, message },
        }
    }

    /// Convert into a `Result`, mapping 401 to [`SyncError::Unauthorized`].
    pub fn into_result(self) -> SyncResult<T> {
        match self {
            Self::Success { data } => Ok(data),
            Self::Failure { status: 401, .. } => Err(SyncError::Unauthorized),
            Self::Failure { status, message } => Err(SyncError::Application { status, message }),
        }
    }
}

impl ApiResult<Value> {
    /// Decode the payload of a successful result into `T`.
    pub fn decode<T: DeserializeOwned>(self) -> Result<ApiResult<T>, serde_json::Error> {
        match self {
            Self::Success { data } => Ok(ApiResult::Success {
                data: serde_json::from_value(data)?,
            }),
            Self::Failure { status, message } => Ok(ApiResult::Failure { status, message }),
        }
    }
}

/// Normalize a raw HTTP status and body into an [`ApiResult`].
///
/// Returns `Err` only when a 2xx body is not valid JSON or carries a
/// malformed envelope. An empty body is read as JSON `null`.
pub fn normalize(status: u16, body: &[u8]) -> Result<ApiResult<Value>, serde_json::Error> {
    let ok = (200..300).contains(&status);
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();

    let value = if trimmed.is_empty() {
        Value::Null
    } else {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => value,
            Err(err) if ok => return Err(err),
            Err(_) => {
                return Ok(ApiResult::Failure {
                    status,
                    message: trimmed.to_string(),
                })
            }
        }
    };

    let flagged = value
        .as_object()
        .and_then(|obj| obj.get("success"))
        .and_then(Value::as_bool);

    match flagged {
        Some(success) => {
            let envelope: ApiEnvelope = match serde_json::from_value(value) {
                Ok(envelope) => envelope,
                Err(err) if ok => return Err(err),
                Err(_) => {
                    return Ok(ApiResult::Failure {
                        status,
                        message: fallback_message(status),
                    })
                }
            };
            if success && ok {
                Ok(ApiResult::Success {
                    data: envelope.data.unwrap_or(Value::Null),
                })
            } else {
                Ok(ApiResult::Failure {
                    status,
                    message: envelope
                        .user_message()
                        .unwrap_or_else(|| fallback_message(status)),
                })
            }
        }
        None if ok => Ok(ApiResult::Success { data: value }),
        None => {
            let message = value.as_object().and_then(|obj| {
                merge_messages(
                    obj.get("message").and_then(Value::as_str),
                    obj.get("error").and_then(Value::as_str),
                )
            });
            Ok(ApiResult::Failure {
                status,
                message: message.unwrap_or_else(|| fallback_message(status)),
            })
        }
    }
}

fn merge_messages(message: Option<&str>, error: Option<&str>) -> Option<String> {
    let message = message.map(str::trim).filter(|m| !m.is_empty());
    let error = error.map(str::trim).filter(|e| !e.is_empty());
    match (message, error) {
        (Some(m), Some(e)) if m == e => Some(m.to_string()),
        (Some(m), Some(e)) => Some(format!("{}: {}", m, e)),
        (Some(m), None) => Some(m.to_string()),
        (None, Some(e)) => Some(e.to_string()),
        (None, None) => None,
    }
}

fn fallback_message(status: u16) -> String {
    format!("Request failed with status {}", status)
}
