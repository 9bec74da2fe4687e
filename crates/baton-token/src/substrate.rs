use serde::{Deserialize, Serialize};

use crate::{ClientId, EventSender, TokenError, TokenName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RequestOutcome {
    /// Granted immediately; a `Granted` event was delivered.
    Granted,
    /// Another client owns the token. `position` is 1-based within the wait queue.
    Queued { position: usize },
    /// The requester already owns the token; nothing was delivered, and later events for it go
    /// to the sender passed with this request.
    AlreadyOwner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub name: TokenName,
    pub owner: Option<ClientId>,
    pub queue: Vec<ClientId>,
}

/// Arbitrates ownership of named tokens across every participating client.
///
/// Implementations must guarantee at most one owner per token and must not deliver `Granted`
/// to the next owner until the outgoing owner's `Revoked` has been acknowledged (or dropped, or
/// the hand-off timeout expired).
#[async_trait::async_trait]
pub trait Substrate: Send + Sync {
    /// Register interest in `token`. Events for this registration go to `events`.
    async fn request(
        &self,
        token: &TokenName,
        client: &ClientId,
        events: EventSender,
    ) -> Result<RequestOutcome, TokenError>;

    /// Give up ownership and hand the token to the next queued candidate.
    ///
    /// A no-op when `client` is not the owner.
    async fn relinquish(&self, token: &TokenName, client: &ClientId) -> Result<(), TokenError>;

    /// Leave the wait queue without touching ownership. A no-op when not queued.
    async fn withdraw(&self, token: &TokenName, client: &ClientId) -> Result<(), TokenError>;

    /// Drop every registration of `client`, relinquishing whatever it owns.
    async fn disconnect(&self, client: &ClientId) -> Result<(), TokenError>;

    async fn snapshot(&self, token: &TokenName) -> Result<Option<TokenSnapshot>, TokenError>;
}
