use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use baton_time::{minute_of_hour, second_of_minute};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Wall-clock condition under which an owner fires its action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FirePredicate {
    /// Due whenever the second-of-minute is a multiple of `divisor`. With the default of 45 that
    /// is seconds 0 and 45 of every minute.
    SecondOfMinute { divisor: u32 },
    /// Due during the first second of every hour.
    TopOfHour,
}

impl Default for FirePredicate {
    fn default() -> Self {
        Self::SecondOfMinute { divisor: 45 }
    }
}

impl FirePredicate {
    pub fn is_due(&self, now: SystemTime) -> bool {
        match *self {
            Self::SecondOfMinute { divisor } => {
                divisor != 0 && second_of_minute(now) % divisor == 0
            }
            Self::TopOfHour => minute_of_hour(now) == 0 && second_of_minute(now) == 0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            Self::SecondOfMinute { divisor } if divisor == 0 || divisor > 60 => {
                Err(ConfigError::Predicate(self.to_string()))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for FirePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SecondOfMinute { divisor } => write!(f, "second-of-minute:{divisor}"),
            Self::TopOfHour => f.write_str("top-of-hour"),
        }
    }
}

impl FromStr for FirePredicate {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("top-of-hour") {
            return Ok(Self::TopOfHour);
        }
        let predicate = raw
            .strip_prefix("second-of-minute:")
            .and_then(|divisor| divisor.parse::<u32>().ok())
            .map(|divisor| Self::SecondOfMinute { divisor })
            .ok_or_else(|| ConfigError::Predicate(raw.to_string()))?;
        predicate.validate()?;
        Ok(predicate)
    }
}
