use std::collections::HashMap;
use std::sync::Mutex;

use crate::{ObjectId, Position};

/// Handle of a playing cue, stable across in-place restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CueHandle(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("cue playback rejected: {0}")]
    Cue(String),
    #[error("animation request rejected: {0}")]
    Animation(String),
}

/// Side effects performed when an owner fires.
///
/// Called with the scheduler's state lock held: implementations must return promptly and must not
/// call back into the scheduler.
pub trait ActionSink: Send + Sync {
    /// Start the object's cue, or restart it in place if one is already playing. Never layers two
    /// concurrent cues for the same object.
    fn play_or_restart_cue(
        &self,
        object: &ObjectId,
        position_hint: Option<Position>,
    ) -> Result<CueHandle, SinkError>;

    /// Rewind `target` to its first frame and keep it running.
    fn advance_animation(&self, target: &ObjectId) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Cue {
        object: ObjectId,
        position: Option<Position>,
        handle: CueHandle,
        restarted: bool,
    },
    Animation {
        target: ObjectId,
    },
}

#[derive(Debug, Default)]
struct Recorded {
    calls: Vec<SinkCall>,
    cues: HashMap<ObjectId, CueHandle>,
    next_handle: u64,
    failing: bool,
}

/// Sink that records every call, for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    inner: Mutex<Recorded>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (calls are still recorded as attempts).
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.lock().calls.clone()
    }

    pub fn cue_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, SinkCall::Cue { .. }))
            .count()
    }

    pub fn animation_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, SinkCall::Animation { .. }))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl ActionSink for RecordingSink {
    fn play_or_restart_cue(
        &self,
        object: &ObjectId,
        position_hint: Option<Position>,
    ) -> Result<CueHandle, SinkError> {
        let mut rec = self.lock();
        let (handle, restarted) = match rec.cues.get(object) {
            Some(handle) => (*handle, true),
            None => {
                rec.next_handle += 1;
                (CueHandle(rec.next_handle), false)
            }
        };
        rec.calls.push(SinkCall::Cue {
            object: object.clone(),
            position: position_hint,
            handle,
            restarted,
        });
        if rec.failing {
            return Err(SinkError::Cue("recording sink set to fail".into()));
        }
        rec.cues.insert(object.clone(), handle);
        Ok(handle)
    }

    fn advance_animation(&self, target: &ObjectId) -> Result<(), SinkError> {
        let mut rec = self.lock();
        rec.calls.push(SinkCall::Animation {
            target: target.clone(),
        });
        if rec.failing {
            return Err(SinkError::Animation("recording sink set to fail".into()));
        }
        Ok(())
    }
}
