use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::SystemTime;

use baton_time::Clock;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{
    ActionSink, ConfigError, CueHandle, ObjectDirectory, ObjectId, TriggerConfig, TriggerPhase,
    TriggerState,
};

/// What a fire acts on: the object that emits the cue and the body whose animation restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireTarget {
    pub object: ObjectId,
    pub linked_body: ObjectId,
}

/// Result of a single predicate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Fired,
    /// Owner, but the predicate is not satisfied.
    Idle,
    /// Inside the refractory window.
    Suppressed,
    /// Not the owner.
    Inactive,
    /// The linked body has no animation yet; skipped until it does.
    NotReady,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSnapshot {
    pub phase: TriggerPhase,
    pub last_fire: Option<SystemTime>,
    pub fire_count: u64,
    pub cue: Option<CueHandle>,
}

/// Drives a [`TriggerState`] for one object.
///
/// While active, a Tokio interval evaluates the predicate every `tick_interval`. A fire invokes the
/// sink with the state lock held, so once [`TriggerScheduler::deactivate`] returns no further side
/// effects are issued. Spawned tasks only hold a weak reference; dropping the scheduler stops them.
pub struct TriggerScheduler {
    shared: Arc<Shared>,
}

struct Shared {
    target: FireTarget,
    config: TriggerConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn ActionSink>,
    directory: Arc<dyn ObjectDirectory>,
    runtime: Mutex<Runtime>,
    phase_tx: watch::Sender<TriggerPhase>,
}

#[derive(Default)]
struct Runtime {
    machine: TriggerState,
    cue: Option<CueHandle>,
    ticks: Option<CancellationToken>,
    refractory: Option<CancellationToken>,
}

impl TriggerScheduler {
    pub fn new(
        target: FireTarget,
        config: TriggerConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn ActionSink>,
        directory: Arc<dyn ObjectDirectory>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (phase_tx, _) = watch::channel(TriggerPhase::Inactive);
        Ok(Self {
            shared: Arc::new(Shared {
                target,
                config,
                clock,
                sink,
                directory,
                runtime: Mutex::new(Runtime::default()),
                phase_tx,
            }),
        })
    }

    pub fn target(&self) -> &FireTarget {
        &self.shared.target
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.shared.config
    }

    pub fn phase(&self) -> TriggerPhase {
        self.shared.lock().machine.phase()
    }

    pub fn subscribe(&self) -> watch::Receiver<TriggerPhase> {
        self.shared.phase_tx.subscribe()
    }

    pub fn snapshot(&self) -> TriggerSnapshot {
        let rt = self.shared.lock();
        TriggerSnapshot {
            phase: rt.machine.phase(),
            last_fire: rt.machine.last_fire(),
            fire_count: rt.machine.fire_count(),
            cue: rt.cue,
        }
    }

    /// Start ticking. Must be called from within a Tokio runtime.
    ///
    /// Returns `false` when already active; the running loop is left untouched.
    pub fn activate(&self) -> bool {
        let mut rt = self.shared.lock();
        if !rt.machine.activate() {
            return false;
        }

        let ticks = CancellationToken::new();
        spawn_tick_loop(
            Arc::downgrade(&self.shared),
            self.shared.config.tick_interval,
            ticks.clone(),
        );
        rt.ticks = Some(ticks);
        self.shared.publish(rt.machine.phase());
        tracing::info!(object = %self.shared.target.object, "trigger activated");
        true
    }

    /// Stop ticking and cancel any pending refractory timer.
    pub fn deactivate(&self) -> bool {
        let mut rt = self.shared.lock();
        if !rt.machine.deactivate() {
            return false;
        }

        if let Some(refractory) = rt.refractory.take() {
            refractory.cancel();
        }
        if let Some(ticks) = rt.ticks.take() {
            ticks.cancel();
        }
        self.shared.publish(rt.machine.phase());
        tracing::info!(object = %self.shared.target.object, "trigger deactivated");
        true
    }

    /// Evaluate the predicate once, outside the regular cadence.
    pub fn tick(&self) -> TickOutcome {
        self.shared.tick()
    }
}

impl Drop for TriggerScheduler {
    fn drop(&mut self) {
        self.deactivate();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Runtime> {
        self.runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, phase: TriggerPhase) {
        self.phase_tx.send_replace(phase);
    }

    fn tick(self: &Arc<Self>) -> TickOutcome {
        let mut rt = self.lock();
        match rt.machine.phase() {
            TriggerPhase::Inactive => return TickOutcome::Inactive,
            TriggerPhase::Suppressed => return TickOutcome::Suppressed,
            TriggerPhase::Active => {}
        }

        if !self.directory.has_animation(&self.target.linked_body) {
            tracing::trace!(body = %self.target.linked_body, "linked body not ready");
            return TickOutcome::NotReady;
        }

        let now = self.clock.now();
        if !self.config.predicate.is_due(now) {
            return TickOutcome::Idle;
        }
        let Some(generation) = rt.machine.begin_fire(now) else {
            return TickOutcome::Idle;
        };

        self.fire(&mut rt);
        self.arm_refractory(&mut rt, generation);
        self.publish(rt.machine.phase());
        TickOutcome::Fired
    }

    /// Both effects are attempted; failures are logged and do not undo the fire.
    fn fire(&self, rt: &mut Runtime) {
        let object = &self.target.object;
        let position = self.directory.position(object);

        match self.sink.play_or_restart_cue(object, position) {
            Ok(handle) => rt.cue = Some(handle),
            Err(err) => tracing::warn!(object = %object, "cue failed: {err}"),
        }
        if let Err(err) = self.sink.advance_animation(&self.target.linked_body) {
            tracing::warn!(
                object = %object,
                body = %self.target.linked_body,
                "animation failed: {err}"
            );
        }

        tracing::info!(
            object = %object,
            fire_count = rt.machine.fire_count(),
            "trigger fired"
        );
    }

    fn arm_refractory(self: &Arc<Self>, rt: &mut Runtime, generation: u64) {
        let cancel = rt
            .ticks
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        rt.refractory = Some(cancel.clone());

        let shared = Arc::downgrade(self);
        let period = self.config.refractory;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(period) => {
                    if let Some(shared) = shared.upgrade() {
                        shared.end_refractory(generation);
                    }
                }
            }
        });
    }

    fn end_refractory(&self, generation: u64) {
        let mut rt = self.lock();
        if rt.machine.end_refractory(generation) {
            rt.refractory = None;
            self.publish(rt.machine.phase());
            tracing::debug!(object = %self.target.object, "refractory period over");
        }
    }
}

fn spawn_tick_loop(
    shared: Weak<Shared>,
    period: std::time::Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let Some(shared) = shared.upgrade() else { break };
                    shared.tick();
                }
            }
        }
    });
}
