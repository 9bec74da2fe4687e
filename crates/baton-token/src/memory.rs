use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{
    AckOutcome, ClientId, EventSender, OwnershipEvent, RequestOutcome, RevokeAck, Substrate,
    TokenError, TokenName, TokenSnapshot,
};

/// Upper bound on how long a hand-off waits for the outgoing owner to acknowledge `Revoked`.
pub const DEFAULT_HANDOFF_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Holder {
    client: ClientId,
    events: EventSender,
}

#[derive(Debug, Default)]
struct Slot {
    owner: Option<Holder>,
    queue: VecDeque<Holder>,
    // Set once the slot has been removed from the map; lockers must look the token up again.
    retired: bool,
}

impl Slot {
    fn is_idle(&self) -> bool {
        self.owner.is_none() && self.queue.is_empty()
    }

    fn owned_by(&self, client: &ClientId) -> bool {
        self.owner.as_ref().is_some_and(|owner| &owner.client == client)
    }
}

type SlotRef = Arc<AsyncMutex<Slot>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubstrateStats {
    pub tokens: u64,
    pub grants_total: u64,
    pub handoffs_total: u64,
    pub ack_timeouts_total: u64,
}

/// Single-process substrate: a map from token name to owner + FIFO wait queue.
///
/// Every operation on one token is serialized by a per-token async lock that stays held for the
/// whole revoke/acknowledge/grant sequence, so a concurrent request can never observe the gap
/// between the outgoing and incoming owner. Tokens are created on first request and dropped as
/// soon as they have neither owner nor waiters.
#[derive(Clone)]
pub struct InMemorySubstrate {
    inner: Arc<Inner>,
}

struct Inner {
    slots: Mutex<HashMap<TokenName, SlotRef>>,
    handoff_timeout: Duration,
    reachable: AtomicBool,
    grants_total: AtomicU64,
    handoffs_total: AtomicU64,
    ack_timeouts_total: AtomicU64,
}

impl Default for InMemorySubstrate {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySubstrate {
    pub fn new() -> Self {
        Self::with_handoff_timeout(DEFAULT_HANDOFF_TIMEOUT)
    }

    pub fn with_handoff_timeout(handoff_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                handoff_timeout,
                reachable: AtomicBool::new(true),
                grants_total: AtomicU64::new(0),
                handoffs_total: AtomicU64::new(0),
                ack_timeouts_total: AtomicU64::new(0),
            }),
        }
    }

    pub fn handoff_timeout(&self) -> Duration {
        self.inner.handoff_timeout
    }

    /// Simulate an outage: while unreachable every operation fails with
    /// [`TokenError::Unavailable`] and no state changes.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Names of all live tokens, sorted.
    pub fn tokens(&self) -> Vec<TokenName> {
        let mut names: Vec<TokenName> = self.slots().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> SubstrateStats {
        SubstrateStats {
            tokens: self.slots().len() as u64,
            grants_total: self.inner.grants_total.load(Ordering::Relaxed),
            handoffs_total: self.inner.handoffs_total.load(Ordering::Relaxed),
            ack_timeouts_total: self.inner.ack_timeouts_total.load(Ordering::Relaxed),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<TokenName, SlotRef>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn ensure_reachable(&self) -> Result<(), TokenError> {
        if self.inner.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TokenError::unavailable("in-memory substrate marked unreachable"))
        }
    }

    fn slot_for(&self, token: &TokenName, create: bool) -> Option<SlotRef> {
        let mut slots = self.slots();
        if let Some(slot) = slots.get(token) {
            return Some(Arc::clone(slot));
        }
        if !create {
            return None;
        }
        let slot = SlotRef::default();
        slots.insert(token.clone(), Arc::clone(&slot));
        Some(slot)
    }

    async fn lock_slot(
        &self,
        token: &TokenName,
        create: bool,
    ) -> Option<(SlotRef, OwnedMutexGuard<Slot>)> {
        loop {
            let slot = self.slot_for(token, create)?;
            let guard = Arc::clone(&slot).lock_owned().await;
            if guard.retired {
                continue;
            }
            return Some((slot, guard));
        }
    }

    fn retire_if_idle(&self, token: &TokenName, slot_ref: &SlotRef, slot: &mut Slot) {
        if !slot.is_idle() {
            return;
        }
        slot.retired = true;
        let mut slots = self.slots();
        if slots
            .get(token)
            .is_some_and(|current| Arc::ptr_eq(current, slot_ref))
        {
            slots.remove(token);
            tracing::debug!(token = %token, "token released");
        }
    }

    async fn revoke(&self, token: &TokenName, outgoing: Holder) {
        let (ack, waiter) = RevokeAck::new();
        let event = OwnershipEvent::Revoked {
            token: token.clone(),
            ack,
        };
        if outgoing.events.send(event).is_err() {
            tracing::debug!(token = %token, client = %outgoing.client, "outgoing owner already gone");
            return;
        }

        match waiter.wait(self.inner.handoff_timeout).await {
            AckOutcome::Acknowledged | AckOutcome::Dropped => {}
            AckOutcome::TimedOut => {
                self.inner
                    .ack_timeouts_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    token = %token,
                    client = %outgoing.client,
                    timeout_ms = self.inner.handoff_timeout.as_millis() as u64,
                    "revoke not acknowledged in time; handing off anyway"
                );
            }
        }
    }

    fn promote(&self, token: &TokenName, slot: &mut Slot) {
        while let Some(next) = slot.queue.pop_front() {
            let granted = OwnershipEvent::Granted {
                token: token.clone(),
            };
            if next.events.send(granted).is_err() {
                tracing::debug!(token = %token, client = %next.client, "skipping candidate whose channel closed");
                continue;
            }
            self.inner.grants_total.fetch_add(1, Ordering::Relaxed);
            self.inner.handoffs_total.fetch_add(1, Ordering::Relaxed);
            tracing::info!(token = %token, client = %next.client, "token handed off");
            slot.owner = Some(next);
            return;
        }
    }

    /// Revoke the current owner and promote the next candidate. The caller holds the slot lock.
    async fn hand_off(&self, token: &TokenName, slot: &mut Slot) {
        if let Some(outgoing) = slot.owner.take() {
            self.revoke(token, outgoing).await;
        }
        self.promote(token, slot);
    }
}

#[async_trait::async_trait]
impl Substrate for InMemorySubstrate {
    async fn request(
        &self,
        token: &TokenName,
        client: &ClientId,
        events: EventSender,
    ) -> Result<RequestOutcome, TokenError> {
        self.ensure_reachable()?;
        let Some((slot_ref, mut guard)) = self.lock_slot(token, true).await else {
            return Err(TokenError::unavailable("token slot could not be created"));
        };
        let slot = &mut *guard;

        let owner_is_requester = slot.owner.as_ref().map(|owner| &owner.client == client);
        let outcome = match owner_is_requester {
            None => {
                let granted = OwnershipEvent::Granted {
                    token: token.clone(),
                };
                if events.send(granted).is_err() {
                    self.retire_if_idle(token, &slot_ref, slot);
                    return Err(TokenError::unavailable("event receiver closed before grant"));
                }
                self.inner.grants_total.fetch_add(1, Ordering::Relaxed);
                tracing::info!(token = %token, client = %client, "token granted");
                slot.owner = Some(Holder {
                    client: client.clone(),
                    events,
                });
                RequestOutcome::Granted
            }
            Some(true) => {
                // Later revocations go to the channel the owner asked with most recently.
                if let Some(owner) = slot.owner.as_mut() {
                    owner.events = events;
                }
                RequestOutcome::AlreadyOwner
            }
            Some(false) => {
                let position = match slot.queue.iter().position(|h| &h.client == client) {
                    Some(idx) => {
                        slot.queue[idx].events = events;
                        idx + 1
                    }
                    None => {
                        slot.queue.push_back(Holder {
                            client: client.clone(),
                            events,
                        });
                        slot.queue.len()
                    }
                };
                tracing::debug!(token = %token, client = %client, position, "request queued");
                RequestOutcome::Queued { position }
            }
        };
        Ok(outcome)
    }

    async fn relinquish(&self, token: &TokenName, client: &ClientId) -> Result<(), TokenError> {
        self.ensure_reachable()?;
        let Some((slot_ref, mut guard)) = self.lock_slot(token, false).await else {
            return Ok(());
        };
        let slot = &mut *guard;
        if !slot.owned_by(client) {
            tracing::trace!(token = %token, client = %client, "relinquish by non-owner ignored");
            return Ok(());
        }

        tracing::info!(token = %token, client = %client, "token relinquished");
        self.hand_off(token, slot).await;
        self.retire_if_idle(token, &slot_ref, slot);
        Ok(())
    }

    async fn withdraw(&self, token: &TokenName, client: &ClientId) -> Result<(), TokenError> {
        self.ensure_reachable()?;
        let Some((slot_ref, mut guard)) = self.lock_slot(token, false).await else {
            return Ok(());
        };
        let slot = &mut *guard;
        slot.queue.retain(|holder| &holder.client != client);
        self.retire_if_idle(token, &slot_ref, slot);
        Ok(())
    }

    async fn disconnect(&self, client: &ClientId) -> Result<(), TokenError> {
        self.ensure_reachable()?;
        let tokens: Vec<TokenName> = self.slots().keys().cloned().collect();
        for token in tokens {
            let Some((slot_ref, mut guard)) = self.lock_slot(&token, false).await else {
                continue;
            };
            let slot = &mut *guard;
            slot.queue.retain(|holder| &holder.client != client);
            if slot.owned_by(client) {
                tracing::info!(token = %token, client = %client, "owner disconnected");
                self.hand_off(&token, slot).await;
            }
            self.retire_if_idle(&token, &slot_ref, slot);
        }
        Ok(())
    }

    async fn snapshot(&self, token: &TokenName) -> Result<Option<TokenSnapshot>, TokenError> {
        self.ensure_reachable()?;
        let Some((_, guard)) = self.lock_slot(token, false).await else {
            return Ok(None);
        };
        Ok(Some(TokenSnapshot {
            name: token.clone(),
            owner: guard.owner.as_ref().map(|owner| owner.client.clone()),
            queue: guard.queue.iter().map(|holder| holder.client.clone()).collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event_channel, EventReceiver};

    fn client(id: &str) -> ClientId {
        ClientId::new(id).unwrap()
    }

    fn token(name: &str) -> TokenName {
        TokenName::new(name).unwrap()
    }

    fn expect_granted(rx: &mut EventReceiver) {
        match rx.try_recv() {
            Ok(OwnershipEvent::Granted { .. }) => {}
            other => panic!("expected Granted, got {other:?}"),
        }
    }

    async fn owner_of(substrate: &InMemorySubstrate, t: &TokenName) -> Option<ClientId> {
        substrate
            .snapshot(t)
            .await
            .unwrap()
            .and_then(|snapshot| snapshot.owner)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn first_request_is_granted_exactly_once() {
        let substrate = InMemorySubstrate::new();
        let t = token("clock:1");
        let (tx, mut rx) = event_channel();

        let outcome = substrate.request(&t, &client("a"), tx.clone()).await.unwrap();
        assert_eq!(outcome, RequestOutcome::Granted);
        expect_granted(&mut rx);

        let again = substrate.request(&t, &client("a"), tx).await.unwrap();
        assert_eq!(again, RequestOutcome::AlreadyOwner);
        assert!(rx.try_recv().is_err(), "re-request must not deliver a second grant");
        assert_eq!(substrate.stats().grants_total, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn owner_re_request_moves_revocations_to_the_new_channel() {
        let substrate = InMemorySubstrate::new();
        let t = token("clock:1");
        let (old_tx, mut old_rx) = event_channel();
        let (new_tx, mut new_rx) = event_channel();
        substrate.request(&t, &client("a"), old_tx).await.unwrap();
        expect_granted(&mut old_rx);

        let outcome = substrate.request(&t, &client("a"), new_tx).await.unwrap();
        assert_eq!(outcome, RequestOutcome::AlreadyOwner);
        assert!(new_rx.try_recv().is_err());

        let relinquish = tokio::spawn({
            let substrate = substrate.clone();
            let t = t.clone();
            async move { substrate.relinquish(&t, &client("a")).await }
        });
        match new_rx.recv().await {
            Some(OwnershipEvent::Revoked { ack, .. }) => ack.complete(),
            other => panic!("expected Revoked, got {other:?}"),
        }
        relinquish.await.unwrap().unwrap();
        assert!(old_rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn request_with_closed_receiver_is_not_granted() {
        let substrate = InMemorySubstrate::new();
        let t = token("clock:1");
        let (tx, rx) = event_channel();
        drop(rx);

        let err = substrate.request(&t, &client("a"), tx).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(substrate.snapshot(&t).await.unwrap(), None);
        assert_eq!(substrate.stats().grants_total, 0);

        let (b_tx, mut b_rx) = event_channel();
        let outcome = substrate.request(&t, &client("b"), b_tx).await.unwrap();
        assert_eq!(outcome, RequestOutcome::Granted);
        expect_granted(&mut b_rx);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn handoff_waits_for_revoke_ack() {
        let substrate = InMemorySubstrate::new();
        let t = token("clock:1");
        let (a_tx, mut a_rx) = event_channel();
        let (b_tx, mut b_rx) = event_channel();

        substrate.request(&t, &client("a"), a_tx).await.unwrap();
        expect_granted(&mut a_rx);
        let outcome = substrate.request(&t, &client("b"), b_tx).await.unwrap();
        assert_eq!(outcome, RequestOutcome::Queued { position: 1 });
        assert!(b_rx.try_recv().is_err());

        let relinquish = tokio::spawn({
            let substrate = substrate.clone();
            let t = t.clone();
            async move { substrate.relinquish(&t, &client("a")).await }
        });

        let ack = match a_rx.recv().await {
            Some(OwnershipEvent::Revoked { ack, .. }) => ack,
            other => panic!("expected Revoked, got {other:?}"),
        };
        tokio::task::yield_now().await;
        assert!(
            b_rx.try_recv().is_err(),
            "next owner granted before the outgoing owner acknowledged"
        );

        ack.complete();
        relinquish.await.unwrap().unwrap();
        expect_granted(&mut b_rx);
        assert_eq!(owner_of(&substrate, &t).await, Some(client("b")));
        assert_eq!(substrate.stats().handoffs_total, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn relinquish_by_non_owner_is_a_noop() {
        let substrate = InMemorySubstrate::new();
        let t = token("clock:1");
        let (a_tx, mut a_rx) = event_channel();
        let (b_tx, mut b_rx) = event_channel();
        substrate.request(&t, &client("a"), a_tx).await.unwrap();
        substrate.request(&t, &client("b"), b_tx).await.unwrap();
        expect_granted(&mut a_rx);

        substrate.relinquish(&t, &client("b")).await.unwrap();
        substrate.relinquish(&t, &client("nobody")).await.unwrap();
        substrate
            .relinquish(&token("never-created"), &client("a"))
            .await
            .unwrap();

        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_err());
        let snapshot = substrate.snapshot(&t).await.unwrap().unwrap();
        assert_eq!(snapshot.owner, Some(client("a")));
        assert_eq!(snapshot.queue, vec![client("b")]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn queue_is_fifo_and_requests_are_deduplicated() {
        let substrate = InMemorySubstrate::new();
        let t = token("clock:fifo");
        let (a_tx, a_rx) = event_channel();
        let (b_tx, _b_rx) = event_channel();
        let (c_tx, mut c_rx) = event_channel();
        let (b2_tx, mut b2_rx) = event_channel();

        substrate.request(&t, &client("a"), a_tx).await.unwrap();
        substrate.request(&t, &client("b"), b_tx).await.unwrap();
        assert_eq!(
            substrate.request(&t, &client("c"), c_tx).await.unwrap(),
            RequestOutcome::Queued { position: 2 }
        );
        // Re-request keeps its place but switches the delivery channel.
        assert_eq!(
            substrate.request(&t, &client("b"), b2_tx).await.unwrap(),
            RequestOutcome::Queued { position: 1 }
        );

        // `a` never reads its channel; the dropped receiver releases the hand-off immediately.
        drop(a_rx);
        substrate.relinquish(&t, &client("a")).await.unwrap();
        expect_granted(&mut b2_rx);
        assert!(c_rx.try_recv().is_err());

        let relinquish = tokio::spawn({
            let substrate = substrate.clone();
            let t = t.clone();
            async move { substrate.relinquish(&t, &client("b")).await }
        });
        // `b2_rx` is still open, so it sees the revocation before `c` is granted.
        match b2_rx.recv().await {
            Some(OwnershipEvent::Revoked { ack, .. }) => ack.complete(),
            other => panic!("expected Revoked, got {other:?}"),
        }
        relinquish.await.unwrap().unwrap();
        expect_granted(&mut c_rx);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn withdraw_leaves_the_queue_only() {
        let substrate = InMemorySubstrate::new();
        let t = token("clock:1");
        let (a_tx, a_rx) = event_channel();
        let (b_tx, mut b_rx) = event_channel();
        substrate.request(&t, &client("a"), a_tx).await.unwrap();
        substrate.request(&t, &client("b"), b_tx).await.unwrap();

        substrate.withdraw(&t, &client("b")).await.unwrap();
        substrate.withdraw(&t, &client("a")).await.unwrap();
        let snapshot = substrate.snapshot(&t).await.unwrap().unwrap();
        assert_eq!(snapshot.owner, Some(client("a")));
        assert!(snapshot.queue.is_empty());

        drop(a_rx);
        substrate.relinquish(&t, &client("a")).await.unwrap();
        assert!(b_rx.try_recv().is_err());
        assert_eq!(substrate.snapshot(&t).await.unwrap(), None);
        assert!(substrate.tokens().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn disconnect_hands_off_every_owned_token() {
        let substrate = InMemorySubstrate::new();
        let t1 = token("clock:1");
        let t2 = token("clock:2");
        let (a_tx, a_rx) = event_channel();
        let (b_tx, mut b_rx) = event_channel();

        substrate.request(&t1, &client("a"), a_tx.clone()).await.unwrap();
        substrate.request(&t2, &client("b"), b_tx.clone()).await.unwrap();
        substrate.request(&t2, &client("a"), a_tx).await.unwrap();
        substrate.request(&t1, &client("b"), b_tx).await.unwrap();
        expect_granted(&mut b_rx);
        drop(a_rx);

        substrate.disconnect(&client("a")).await.unwrap();

        expect_granted(&mut b_rx);
        assert_eq!(owner_of(&substrate, &t1).await, Some(client("b")));
        let snapshot = substrate.snapshot(&t2).await.unwrap().unwrap();
        assert_eq!(snapshot.owner, Some(client("b")));
        assert!(snapshot.queue.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn candidates_with_closed_channels_are_skipped() {
        let substrate = InMemorySubstrate::new();
        let t = token("clock:1");
        let (a_tx, a_rx) = event_channel();
        let (b_tx, b_rx) = event_channel();
        let (c_tx, mut c_rx) = event_channel();
        substrate.request(&t, &client("a"), a_tx).await.unwrap();
        substrate.request(&t, &client("b"), b_tx).await.unwrap();
        substrate.request(&t, &client("c"), c_tx).await.unwrap();
        drop(a_rx);
        drop(b_rx);

        substrate.relinquish(&t, &client("a")).await.unwrap();
        expect_granted(&mut c_rx);
        let snapshot = substrate.snapshot(&t).await.unwrap().unwrap();
        assert_eq!(snapshot.owner, Some(client("c")));
        assert!(snapshot.queue.is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn unacknowledged_revoke_times_out() {
        let substrate = InMemorySubstrate::with_handoff_timeout(Duration::from_millis(100));
        let t = token("clock:1");
        let (a_tx, mut a_rx) = event_channel();
        let (b_tx, mut b_rx) = event_channel();
        substrate.request(&t, &client("a"), a_tx).await.unwrap();
        substrate.request(&t, &client("b"), b_tx).await.unwrap();
        expect_granted(&mut a_rx);

        // `a_rx` stays open and nobody reads it, so the ack inside is never completed.
        substrate.relinquish(&t, &client("a")).await.unwrap();
        expect_granted(&mut b_rx);
        assert_eq!(substrate.stats().ack_timeouts_total, 1);
        assert!(matches!(
            a_rx.try_recv(),
            Ok(OwnershipEvent::Revoked { .. })
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unreachable_substrate_fails_without_side_effects() {
        let substrate = InMemorySubstrate::new();
        let t = token("clock:1");
        substrate.set_reachable(false);
        let (tx, mut rx) = event_channel();

        let err = substrate.request(&t, &client("a"), tx.clone()).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(substrate.relinquish(&t, &client("a")).await.is_err());
        assert!(rx.try_recv().is_err());

        substrate.set_reachable(true);
        assert_eq!(
            substrate.request(&t, &client("a"), tx).await.unwrap(),
            RequestOutcome::Granted
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_grant_a_single_owner() {
        let substrate = InMemorySubstrate::new();
        let t = token("clock:race");
        let mut receivers = Vec::new();
        let mut tasks = Vec::new();
        for i in 0..16 {
            let (tx, rx) = event_channel();
            receivers.push(rx);
            let substrate = substrate.clone();
            let t = t.clone();
            tasks.push(tokio::spawn(async move {
                substrate
                    .request(&t, &client(&format!("c{i}")), tx)
                    .await
                    .unwrap()
            }));
        }
        let mut granted = 0;
        for task in tasks {
            if task.await.unwrap() == RequestOutcome::Granted {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);
        let delivered = receivers
            .iter_mut()
            .map(|rx| rx.try_recv().is_ok())
            .filter(|ok| *ok)
            .count();
        assert_eq!(delivered, 1);
        let snapshot = substrate.snapshot(&t).await.unwrap().unwrap();
        assert_eq!(snapshot.queue.len(), 15);
    }
}
