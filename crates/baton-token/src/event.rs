use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::TokenName;

/// Ownership change for one registration, delivered in order on that registration's channel.
#[derive(Debug)]
pub enum OwnershipEvent {
    /// The receiving client now owns `token`.
    Granted { token: TokenName },
    /// The receiving client lost `token` (or was dropped from its queue).
    ///
    /// The next owner is not granted until `ack` is completed or dropped, so the receiver must
    /// stop acting as owner *before* acknowledging.
    Revoked { token: TokenName, ack: RevokeAck },
}

impl OwnershipEvent {
    pub fn token(&self) -> &TokenName {
        match self {
            Self::Granted { token } | Self::Revoked { token, .. } => token,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<OwnershipEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<OwnershipEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Acknowledgement half of a revocation.
///
/// Dropping it without calling [`RevokeAck::complete`] also releases the waiter; a receiver that
/// has gone away cannot still be acting as owner.
#[derive(Debug)]
pub struct RevokeAck {
    tx: Option<oneshot::Sender<()>>,
}

impl RevokeAck {
    pub fn new() -> (Self, AckWaiter) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, AckWaiter { rx })
    }

    pub fn complete(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acknowledged,
    /// The ack was dropped unanswered (receiver gone).
    Dropped,
    TimedOut,
}

#[derive(Debug)]
pub struct AckWaiter {
    rx: oneshot::Receiver<()>,
}

impl AckWaiter {
    pub async fn wait(self, timeout: Duration) -> AckOutcome {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(())) => AckOutcome::Acknowledged,
            Ok(Err(_)) => AckOutcome::Dropped,
            Err(_) => AckOutcome::TimedOut,
        }
    }
}
