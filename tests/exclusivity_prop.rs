//! Random request/relinquish/withdraw/disconnect sequences over several clients never leave two
//! schedulers acting as owner of the same token.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use baton_time::FakeClock;
use baton_token::{
    event_channel, ClientId, EventReceiver, EventSender, InMemorySubstrate, OwnershipEvent,
    Substrate, TokenName,
};
use baton_trigger::{
    FireTarget, ObjectRecord, RecordingSink, StaticDirectory, TriggerConfig, TriggerPhase,
    TriggerScheduler,
};
use proptest::prelude::*;

const CLIENTS: usize = 4;

#[derive(Debug, Clone, Copy)]
enum Op {
    Request(usize),
    Relinquish(usize),
    Withdraw(usize),
    Disconnect(usize),
}

fn ops() -> impl Strategy<Value = Vec<Op>> {
    let client = 0..CLIENTS;
    let op = prop_oneof![
        4 => client.clone().prop_map(Op::Request),
        3 => client.clone().prop_map(Op::Relinquish),
        1 => client.clone().prop_map(Op::Withdraw),
        1 => client.prop_map(Op::Disconnect),
    ];
    proptest::collection::vec(op, 1..40)
}

fn is_owning(scheduler: &TriggerScheduler) -> bool {
    matches!(
        scheduler.phase(),
        TriggerPhase::Active | TriggerPhase::Suppressed
    )
}

struct Client {
    id: ClientId,
    events: EventSender,
    scheduler: Arc<TriggerScheduler>,
}

/// Minimal owner loop: stop before acknowledging, and check exclusivity at the moment of grant.
async fn drive(
    me: usize,
    mut events: EventReceiver,
    schedulers: Arc<Vec<Arc<TriggerScheduler>>>,
    overlaps: Arc<AtomicUsize>,
) {
    while let Some(event) = events.recv().await {
        match event {
            OwnershipEvent::Granted { .. } => {
                let others = schedulers
                    .iter()
                    .enumerate()
                    .filter(|(idx, scheduler)| *idx != me && is_owning(scheduler))
                    .count();
                if others > 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                schedulers[me].activate();
            }
            OwnershipEvent::Revoked { ack, .. } => {
                schedulers[me].deactivate();
                ack.complete();
            }
        }
    }
}

async fn run(ops: Vec<Op>) -> Result<(), TestCaseError> {
    let substrate = InMemorySubstrate::new();
    let clock = FakeClock::at_unix_secs(10);
    let directory = Arc::new(StaticDirectory::from_records([ObjectRecord {
        id: "body".into(),
        linked_body: None,
        position: None,
        animation: true,
    }]));
    let token = TokenName::new("clock:1").unwrap();

    let mut clients = Vec::new();
    let mut receivers = Vec::new();
    for idx in 0..CLIENTS {
        let scheduler = TriggerScheduler::new(
            FireTarget {
                object: "hand".into(),
                linked_body: "body".into(),
            },
            TriggerConfig::default(),
            Arc::new(clock.clone()),
            Arc::new(RecordingSink::new()),
            directory.clone(),
        )
        .unwrap();
        let (events, rx) = event_channel();
        clients.push(Client {
            id: ClientId::new(format!("client-{idx}")).unwrap(),
            events,
            scheduler: Arc::new(scheduler),
        });
        receivers.push(rx);
    }

    let schedulers: Arc<Vec<Arc<TriggerScheduler>>> = Arc::new(
        clients
            .iter()
            .map(|client| Arc::clone(&client.scheduler))
            .collect(),
    );
    let overlaps = Arc::new(AtomicUsize::new(0));
    for (idx, rx) in receivers.into_iter().enumerate() {
        tokio::spawn(drive(
            idx,
            rx,
            Arc::clone(&schedulers),
            Arc::clone(&overlaps),
        ));
    }

    for op in ops {
        match op {
            Op::Request(idx) => {
                let client = &clients[idx];
                substrate
                    .request(&token, &client.id, client.events.clone())
                    .await
                    .unwrap();
            }
            Op::Relinquish(idx) => substrate.relinquish(&token, &clients[idx].id).await.unwrap(),
            Op::Withdraw(idx) => substrate.withdraw(&token, &clients[idx].id).await.unwrap(),
            Op::Disconnect(idx) => substrate.disconnect(&clients[idx].id).await.unwrap(),
        }

        let owning: Vec<usize> = (0..CLIENTS)
            .filter(|idx| is_owning(&schedulers[*idx]))
            .collect();
        prop_assert!(owning.len() <= 1, "several owners after {op:?}: {owning:?}");

        // Once every grant/revoke has been processed, the running scheduler is the recorded owner.
        tokio::time::sleep(Duration::from_millis(1)).await;
        let owner = substrate
            .snapshot(&token)
            .await
            .unwrap()
            .and_then(|snapshot| snapshot.owner);
        let running: Option<ClientId> = (0..CLIENTS)
            .find(|idx| is_owning(&schedulers[*idx]))
            .map(|idx| clients[idx].id.clone());
        prop_assert_eq!(running, owner, "after {:?}", op);
    }

    prop_assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        rng_algorithm: proptest::test_runner::RngAlgorithm::ChaCha,
        rng_seed: proptest::test_runner::RngSeed::Fixed(0xBA_70_4E),
        .. ProptestConfig::default()
    })]

    #[test]
    fn at_most_one_scheduler_owns_the_token(ops in ops()) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        rt.block_on(run(ops))?;
    }
}
