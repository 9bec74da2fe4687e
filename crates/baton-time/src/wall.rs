use std::time::{SystemTime, UNIX_EPOCH};

// Timestamps before the epoch clamp to zero; every fire predicate treats them as 00:00:00.
fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Second within the current minute (`0..60`).
///
/// Civil time-zone offsets are whole minutes, so the UTC value matches local time.
pub fn second_of_minute(t: SystemTime) -> u32 {
    (unix_secs(t) % 60) as u32
}

/// Minute within the current hour (`0..60`), in UTC.
pub fn minute_of_hour(t: SystemTime) -> u32 {
    ((unix_secs(t) / 60) % 60) as u32
}

pub fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn splits_wall_time() {
        // 1970-01-01T01:02:45Z
        let t = UNIX_EPOCH + Duration::from_secs(3600 + 2 * 60 + 45) + Duration::from_millis(900);
        assert_eq!(second_of_minute(t), 45);
        assert_eq!(minute_of_hour(t), 2);
        assert_eq!(unix_millis(t), 3_765_900);
    }

    #[test]
    fn pre_epoch_clamps_to_zero() {
        let t = UNIX_EPOCH - Duration::from_secs(7);
        assert_eq!(second_of_minute(t), 0);
        assert_eq!(minute_of_hour(t), 0);
        assert_eq!(unix_millis(t), 0);
    }
}
