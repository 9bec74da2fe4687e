use std::fmt;

use serde::{Deserialize, Serialize};

use crate::TokenError;

pub const MAX_TOKEN_NAME_LEN: usize = 256;
pub const MAX_CLIENT_ID_LEN: usize = 128;

fn is_valid_ident(raw: &str, max_len: usize) -> bool {
    !raw.is_empty() && raw.len() <= max_len && !raw.chars().any(char::is_control)
}

/// Stable name shared by every candidate for the same coordinated object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenName(String);

impl TokenName {
    pub fn new(name: impl Into<String>) -> Result<Self, TokenError> {
        let name = name.into();
        if !is_valid_ident(&name, MAX_TOKEN_NAME_LEN) {
            return Err(TokenError::InvalidName { name });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TokenName {
    type Error = TokenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TokenName> for String {
    fn from(value: TokenName) -> Self {
        value.0
    }
}

impl fmt::Display for TokenName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one participating client process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Result<Self, TokenError> {
        let id = id.into();
        if !is_valid_ident(&id, MAX_CLIENT_ID_LEN) {
            return Err(TokenError::InvalidClientId { id });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ClientId {
    type Error = TokenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClientId> for String {
    fn from(value: ClientId) -> Self {
        value.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_oversized_and_control_names() {
        assert!(TokenName::new("").is_err());
        assert!(TokenName::new("a".repeat(MAX_TOKEN_NAME_LEN + 1)).is_err());
        assert!(TokenName::new("clock:\n1").is_err());
        assert!(TokenName::new("a".repeat(MAX_TOKEN_NAME_LEN)).is_ok());

        assert!(ClientId::new("").is_err());
        assert!(ClientId::new("x".repeat(MAX_CLIENT_ID_LEN + 1)).is_err());
        assert_eq!(ClientId::new("node-a").unwrap().as_str(), "node-a");
    }

    #[test]
    fn deserialization_validates() {
        let err = serde_json::from_str::<TokenName>("\"\"").unwrap_err();
        assert!(err.to_string().contains("invalid token name"));
        let name: TokenName = serde_json::from_str("\"clock:1\"").unwrap();
        assert_eq!(name.as_str(), "clock:1");
    }
}
