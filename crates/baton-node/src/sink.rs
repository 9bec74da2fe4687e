use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use baton_trigger::{ActionSink, CueHandle, ObjectId, Position, SinkError};

/// Reference sink for headless nodes: every effect becomes a structured log line.
///
/// Keeps one cue handle per object so repeated fires restart the same cue instead of layering.
#[derive(Debug, Default)]
pub struct TracingSink {
    state: Mutex<CueTable>,
}

#[derive(Debug, Default)]
struct CueTable {
    cues: HashMap<ObjectId, CueHandle>,
    next_handle: u64,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CueTable> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ActionSink for TracingSink {
    fn play_or_restart_cue(
        &self,
        object: &ObjectId,
        position_hint: Option<Position>,
    ) -> Result<CueHandle, SinkError> {
        let mut table = self.lock();
        if let Some(handle) = table.cues.get(object).copied() {
            tracing::info!(object = %object, cue = handle.0, "cue restarted");
            return Ok(handle);
        }

        table.next_handle += 1;
        let handle = CueHandle(table.next_handle);
        table.cues.insert(object.clone(), handle);
        match position_hint {
            Some(Position { x, y, z }) => {
                tracing::info!(object = %object, cue = handle.0, x, y, z, "cue started")
            }
            None => tracing::info!(object = %object, cue = handle.0, "cue started"),
        }
        Ok(handle)
    }

    fn advance_animation(&self, target: &ObjectId) -> Result<(), SinkError> {
        tracing::info!(body = %target, "animation restarted at frame 0");
        Ok(())
    }
}
