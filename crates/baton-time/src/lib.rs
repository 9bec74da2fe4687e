//! Wall-clock sources for the baton trigger.
//!
//! Fire predicates are evaluated against **wall-clock** time (second-of-minute boundaries), not
//! against a monotonic interval. In production the time comes from [`SystemClock`]; tests drive
//! the predicate deterministically through a shared [`FakeClock`].

mod clock;
mod wall;

pub use clock::{Clock, FakeClock, SystemClock};
pub use wall::{minute_of_hour, second_of_minute, unix_millis};
