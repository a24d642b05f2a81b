use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by the backend collaborator for a load or send.
///
/// Opaque to this layer beyond an optional numeric code and a
/// human-readable message.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[error("{message} (code {code:?})")]
pub struct BackendError {
    pub code: Option<i64>,
    pub message: String,
}

impl BackendError {
    pub fn new(code: impl Into<Option<i64>>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced to the display collaborator.
///
/// All errors are terminal at this layer: they are reported as a banner /
/// toast and never retried automatically. Session state stays consistent
/// regardless.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionError {
    #[error("send failed: {0}")]
    SendFailed(BackendError),

    #[error("resend failed: {0}")]
    ResendFailed(BackendError),

    #[error("page load failed: {0}")]
    PageLoadFailed(BackendError),
}
