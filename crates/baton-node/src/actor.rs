use std::sync::Arc;

use baton_token::{
    ClientId, EventReceiver, EventSender, OwnershipEvent, RequestOutcome, Substrate, TokenName,
};
use baton_trigger::TriggerScheduler;
use tokio_util::sync::CancellationToken;

use crate::Backoff;

/// Consumes one object's ownership events in order and drives its scheduler.
///
/// On `Revoked` the scheduler reaches `Inactive` before the ack is completed, then interest is
/// re-registered so the object is picked up again once the token comes back around.
pub(crate) struct ObjectActor {
    pub(crate) token: TokenName,
    pub(crate) client: ClientId,
    pub(crate) substrate: Arc<dyn Substrate>,
    pub(crate) scheduler: Arc<TriggerScheduler>,
    /// Sender half of this actor's own event channel, reused for re-requests.
    pub(crate) events_tx: EventSender,
    pub(crate) backoff: Backoff,
    pub(crate) cancel: CancellationToken,
}

impl ObjectActor {
    pub(crate) async fn run(mut self, mut events: EventReceiver) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                OwnershipEvent::Granted { token } => {
                    if self.scheduler.activate() {
                        tracing::info!(token = %token, client = %self.client, "ownership granted");
                    }
                }
                OwnershipEvent::Revoked { token, ack } => {
                    self.scheduler.deactivate();
                    ack.complete();
                    tracing::info!(token = %token, client = %self.client, "ownership revoked");
                    if !self.reclaim().await {
                        break;
                    }
                }
            }
        }
        self.scheduler.deactivate();
    }

    /// Re-register interest, retrying `Unavailable` with backoff. Returns `false` once cancelled.
    async fn reclaim(&mut self) -> bool {
        self.backoff.reset();
        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                result = self.substrate.request(&self.token, &self.client, self.events_tx.clone()) => result,
            };

            match result {
                Ok(RequestOutcome::AlreadyOwner) => {
                    // A reply lost earlier left this client holding the token; no `Granted` follows.
                    if self.scheduler.activate() {
                        tracing::info!(token = %self.token, client = %self.client, "ownership still held");
                    }
                    return true;
                }
                Ok(outcome) => {
                    tracing::debug!(token = %self.token, ?outcome, "interest re-registered");
                    return true;
                }
                Err(err) if err.is_unavailable() => {
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        token = %self.token,
                        retry_ms = delay.as_millis() as u64,
                        "re-request failed: {err}"
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return false,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => {
                    tracing::error!(token = %self.token, "giving up on re-request: {err}");
                    return true;
                }
            }
        }
    }
}
