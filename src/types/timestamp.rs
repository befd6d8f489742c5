//! Replica-local timestamp clock for command ordering.
//!
//! Commands are ordered by epoch-millisecond timestamps. Wall clocks alone are
//! not enough: a replica that issues a crew spend and the clock change it
//! funds within the same millisecond must still order them, and a command
//! issued right after receiving a peer's command must sort after it. The
//! clock below is a Lamport clock whose counter is the wall clock.

use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

use chrono::Utc;

/// How far ahead of the local wall clock an observed timestamp may pull the
/// clock. Anything further is clamped so one bad peer cannot exhaust the
/// timestamp range.
pub const MAX_CLOCK_SKEW_MS: i64 = 24 * 60 * 60 * 1000;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A thread-safe clock producing strictly increasing epoch-ms timestamps.
#[derive(Debug, Default)]
pub struct TimestampClock {
    last: AtomicI64,
}

impl TimestampClock {
    /// Creates a new clock that has observed nothing yet.
    pub fn new() -> Self {
        TimestampClock {
            last: AtomicI64::new(0),
        }
    }

    /// Generates the next timestamp: the wall clock, or one past the last
    /// issued/observed timestamp if the wall clock has not moved past it.
    pub fn tick(&self) -> i64 {
        let mut current = self.last.load(AtomicOrdering::SeqCst);
        loop {
            let next = now_millis().max(current.saturating_add(1));
            match self.last.compare_exchange_weak(
                current,
                next,
                AtomicOrdering::SeqCst,
                AtomicOrdering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Advances the clock past a timestamp received from a peer or from
    /// persisted history, so later local commands sort after it.
    ///
    /// Returns `false` when the timestamp lies more than
    /// [`MAX_CLOCK_SKEW_MS`] in the future; the clock then only advances to
    /// that bound.
    pub fn observe(&self, timestamp: i64) -> bool {
        let bound = now_millis().saturating_add(MAX_CLOCK_SKEW_MS);
        self.last.fetch_max(timestamp.min(bound), AtomicOrdering::SeqCst);
        timestamp <= bound
    }

    /// The last issued or observed timestamp.
    pub fn last(&self) -> i64 {
        self.last.load(AtomicOrdering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_is_strictly_increasing() {
        let clock = TimestampClock::new();

        let ts1 = clock.tick();
        let ts2 = clock.tick();
        let ts3 = clock.tick();

        assert!(ts1 < ts2);
        assert!(ts2 < ts3);
    }

    #[test]
    fn test_observe_future_timestamp() {
        let clock = TimestampClock::new();
        let future = now_millis() + 60_000;

        clock.observe(future);
        let next = clock.tick();

        assert_eq!(next, future + 1);
    }

    #[test]
    fn test_observe_clamps_far_future() {
        let clock = TimestampClock::new();

        assert!(!clock.observe(i64::MAX));
        let first = clock.tick();
        let second = clock.tick();

        assert!(first < second);
        assert!(second <= now_millis() + MAX_CLOCK_SKEW_MS + 2);
    }

    #[test]
    fn test_tick_saturates_at_range_end() {
        let clock = TimestampClock {
            last: AtomicI64::new(i64::MAX),
        };

        assert_eq!(clock.tick(), i64::MAX);
    }

    #[test]
    fn test_observe_never_goes_backwards() {
        let clock = TimestampClock::new();
        let ts = clock.tick();

        clock.observe(1);

        assert_eq!(clock.last(), ts);
    }
}
