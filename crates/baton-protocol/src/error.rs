use baton_token::TokenError;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame of {len} bytes exceeds the 16384 byte limit")]
    FrameTooLarge { len: usize },
}

/// Stable error codes carried inside a `reply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    Unavailable,
    InvalidName,
    InvalidClientId,
    Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
}

impl WireError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Protocol,
            message: message.into(),
        }
    }

    /// Map back onto the caller-facing error. Anything the server could not serve surfaces as
    /// `Unavailable` so callers apply a single retry policy.
    pub fn into_token_error(self) -> TokenError {
        match self.code {
            ErrorCode::InvalidName => TokenError::InvalidName {
                name: self.message,
            },
            ErrorCode::InvalidClientId => TokenError::InvalidClientId { id: self.message },
            ErrorCode::Unavailable | ErrorCode::Protocol => TokenError::unavailable(self.message),
        }
    }
}

impl From<&TokenError> for WireError {
    fn from(err: &TokenError) -> Self {
        match err {
            TokenError::Unavailable { reason } => Self {
                code: ErrorCode::Unavailable,
                message: reason.clone(),
            },
            TokenError::InvalidName { name } => Self {
                code: ErrorCode::InvalidName,
                message: name.clone(),
            },
            TokenError::InvalidClientId { id } => Self {
                code: ErrorCode::InvalidClientId,
                message: id.clone(),
            },
        }
    }
}
