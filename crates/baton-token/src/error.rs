#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// The coordination substrate could not be reached. Retrying is the caller's decision.
    #[error("coordination substrate unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("invalid token name {name:?} (must be 1..=256 bytes without control characters)")]
    InvalidName { name: String },
    #[error("invalid client id {id:?} (must be 1..=128 bytes without control characters)")]
    InvalidClientId { id: String },
}

impl TokenError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}
