//! JSON messages exchanged between a remote node and the coordination server.
//!
//! Every message travels as one WebSocket text frame negotiated with [`SUBPROTOCOL`]. Messages are
//! internally tagged by `type`:
//!
//! ```text
//! client -> server: hello | request | relinquish | withdraw | snapshot | revokeAck
//! server -> client: welcome | reply | granted | revoked
//! ```
//!
//! The first client frame must be `hello`. Operations carry a client-chosen `requestId` that the
//! matching `reply` echoes; ownership notifications are unsolicited.

#![forbid(unsafe_code)]

mod error;
mod message;

pub use error::{ErrorCode, ProtocolError, WireError};
pub use message::{ClientMessage, ServerMessage};

pub const SUBPROTOCOL: &str = "baton-v1";

/// Upper bound on a single text frame, in bytes. Larger frames are rejected before parsing.
pub const MAX_FRAME_LEN: usize = 16 * 1024;
