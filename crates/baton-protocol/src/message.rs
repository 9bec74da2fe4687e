use baton_token::{ClientId, RequestOutcome, TokenError, TokenName, TokenSnapshot};
use serde::{Deserialize, Serialize};

use crate::{ProtocolError, WireError, MAX_FRAME_LEN};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Hello { client_id: ClientId },
    #[serde(rename_all = "camelCase")]
    Request { request_id: u64, token: TokenName },
    #[serde(rename_all = "camelCase")]
    Relinquish { request_id: u64, token: TokenName },
    #[serde(rename_all = "camelCase")]
    Withdraw { request_id: u64, token: TokenName },
    #[serde(rename_all = "camelCase")]
    Snapshot { request_id: u64, token: TokenName },
    /// The client reached `Inactive` for `token`; the server may grant the next candidate.
    RevokeAck { token: TokenName },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Welcome { client_id: ClientId },
    /// Answer to the operation with the same `request_id`. No field set means success without a
    /// value (`relinquish`, `withdraw`, or `snapshot` of an unknown token).
    #[serde(rename_all = "camelCase")]
    Reply {
        request_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        outcome: Option<RequestOutcome>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<TokenSnapshot>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
    Granted { token: TokenName },
    Revoked { token: TokenName },
}

fn check_len(text: &str) -> Result<(), ProtocolError> {
    if text.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge { len: text.len() });
    }
    Ok(())
}

impl ClientMessage {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        check_len(text)?;
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerMessage {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        check_len(text)?;
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn outcome_reply(request_id: u64, result: &Result<RequestOutcome, TokenError>) -> Self {
        match result {
            Ok(outcome) => Self::Reply {
                request_id,
                outcome: Some(*outcome),
                snapshot: None,
                error: None,
            },
            Err(err) => Self::error_reply(request_id, err),
        }
    }

    pub fn done_reply(request_id: u64, result: &Result<(), TokenError>) -> Self {
        match result {
            Ok(()) => Self::Reply {
                request_id,
                outcome: None,
                snapshot: None,
                error: None,
            },
            Err(err) => Self::error_reply(request_id, err),
        }
    }

    pub fn snapshot_reply(
        request_id: u64,
        result: &Result<Option<TokenSnapshot>, TokenError>,
    ) -> Self {
        match result {
            Ok(snapshot) => Self::Reply {
                request_id,
                outcome: None,
                snapshot: snapshot.clone(),
                error: None,
            },
            Err(err) => Self::error_reply(request_id, err),
        }
    }

    pub fn error_reply(request_id: u64, err: &TokenError) -> Self {
        Self::Reply {
            request_id,
            outcome: None,
            snapshot: None,
            error: Some(WireError::from(err)),
        }
    }

    /// Token named by an ownership notification, if this is one.
    pub fn notification_token(&self) -> Option<&TokenName> {
        match self {
            Self::Granted { token } | Self::Revoked { token } => Some(token),
            Self::Welcome { .. } | Self::Reply { .. } => None,
        }
    }
}
