use std::time::SystemTime;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerPhase {
    /// Not the owner; no ticks run.
    Inactive,
    /// Owner, evaluating the predicate every tick.
    Active,
    /// Owner inside the refractory window after a fire.
    Suppressed,
}

/// The scheduler's state machine, free of timers and I/O.
///
/// Every transition bumps `generation`; a refractory timer armed by [`TriggerState::begin_fire`]
/// can only end the window it was armed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerState {
    phase: TriggerPhase,
    generation: u64,
    last_fire: Option<SystemTime>,
    fire_count: u64,
}

impl Default for TriggerState {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerState {
    pub fn new() -> Self {
        Self {
            phase: TriggerPhase::Inactive,
            generation: 0,
            last_fire: None,
            fire_count: 0,
        }
    }

    pub fn phase(&self) -> TriggerPhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_fire(&self) -> Option<SystemTime> {
        self.last_fire
    }

    pub fn fire_count(&self) -> u64 {
        self.fire_count
    }

    /// `Inactive -> Active`. Returns `false` (and changes nothing) when already owning.
    pub fn activate(&mut self) -> bool {
        if self.phase != TriggerPhase::Inactive {
            return false;
        }
        self.enter(TriggerPhase::Active);
        true
    }

    /// `Active | Suppressed -> Inactive`, invalidating any armed refractory timer.
    pub fn deactivate(&mut self) -> bool {
        if self.phase == TriggerPhase::Inactive {
            return false;
        }
        self.enter(TriggerPhase::Inactive);
        true
    }

    /// `Active -> Suppressed`. Returns the generation the refractory timer must present to
    /// [`TriggerState::end_refractory`], or `None` when firing is not allowed.
    pub fn begin_fire(&mut self, now: SystemTime) -> Option<u64> {
        if self.phase != TriggerPhase::Active {
            return None;
        }
        self.enter(TriggerPhase::Suppressed);
        self.last_fire = Some(now);
        self.fire_count += 1;
        Some(self.generation)
    }

    /// `Suppressed -> Active`, only for the timer armed by the latest fire.
    pub fn end_refractory(&mut self, generation: u64) -> bool {
        if self.phase != TriggerPhase::Suppressed || generation != self.generation {
            return false;
        }
        self.enter(TriggerPhase::Active);
        true
    }

    fn enter(&mut self, phase: TriggerPhase) {
        self.phase = phase;
        self.generation = self.generation.wrapping_add(1);
    }
}
