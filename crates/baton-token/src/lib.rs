//! Named exclusive-ownership tokens ("batons") with ordered hand-off.
//!
//! A token has at most one owner. Other candidates wait in arrival order and are granted the
//! token only after the outgoing owner has acknowledged its revocation, so two clients never
//! act as owner at the same time.
//!
//! Ownership changes are delivered as [`OwnershipEvent`] messages on a per-registration channel
//! rather than as callbacks; the arbitration itself lives behind the [`Substrate`] trait.

#![forbid(unsafe_code)]

mod error;
mod event;
mod memory;
mod substrate;
mod types;

pub use error::TokenError;
pub use event::{
    event_channel, AckOutcome, AckWaiter, EventReceiver, EventSender, OwnershipEvent, RevokeAck,
};
pub use memory::{InMemorySubstrate, SubstrateStats, DEFAULT_HANDOFF_TIMEOUT};
pub use substrate::{RequestOutcome, Substrate, TokenSnapshot};
pub use types::{ClientId, TokenName, MAX_CLIENT_ID_LEN, MAX_TOKEN_NAME_LEN};
