use std::time::Duration;

use crate::FirePredicate;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_REFRACTORY_PERIOD: Duration = Duration::from_millis(5000);

const MAX_TICK_INTERVAL: Duration = Duration::from_secs(1);
/// The predicate reads wall-clock seconds while the refractory timer runs on the monotonic clock;
/// a 1s window can expire inside the boundary second it was started in once the two drift.
pub const MIN_REFRACTORY_PERIOD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("tick interval must be within (0, 1s], got {0:?}")]
    TickInterval(Duration),
    #[error(
        "refractory period {refractory:?} must be at least 2s and longer than the tick interval {tick:?}"
    )]
    Refractory { refractory: Duration, tick: Duration },
    #[error("invalid fire predicate {0:?} (expected `second-of-minute:<1..=60>` or `top-of-hour`)")]
    Predicate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerConfig {
    /// How often the predicate is evaluated. At most one second so no boundary second is missed.
    pub tick_interval: Duration,
    /// Minimum spacing between two fires.
    pub refractory: Duration,
    pub predicate: FirePredicate,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            refractory: DEFAULT_REFRACTORY_PERIOD,
            predicate: FirePredicate::default(),
        }
    }
}

impl TriggerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() || self.tick_interval > MAX_TICK_INTERVAL {
            return Err(ConfigError::TickInterval(self.tick_interval));
        }
        if self.refractory < MIN_REFRACTORY_PERIOD || self.refractory <= self.tick_interval {
            return Err(ConfigError::Refractory {
                refractory: self.refractory,
                tick: self.tick_interval,
            });
        }
        self.predicate.validate()
    }
}
