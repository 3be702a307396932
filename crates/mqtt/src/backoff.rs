//! Exponential backoff for reconnect scheduling.
//!
//! The delay doubles every time a reconnect is scheduled and is capped at the
//! configured maximum:
//!
//! ```text
//! delay[n] = min(initial * 2^(n-1), max_delay)
//! ```
//!
//! With the defaults (initial=1s, max=60s):
//! - Attempt 1: wait 1s
//! - Attempt 2: wait 2s
//! - Attempt 3: wait 4s
//! - ...
//! - Attempt 7+: wait 60s (capped)
//!
//! A successful connect resets the delay to `initial`.
//!
//! # Thread Safety
//!
//! Unlike a `Mutex`-guarded counter, `Backoff` keeps its state in atomics. The
//! reconnect timer and the transport callback context both touch it, and
//! neither may block. `reset()` is a release store and `next_delay()` an
//! acquire-release update, so a reset that happens before a schedule is always
//! observed by it. The invariant `initial <= current <= max` holds for every
//! interleaving because each update computes its value from `initial`/`max`
//! directly.
//!
//! # Examples
//!
//! ```ignore
//! use std::time::Duration;
//! use iotdatatunnel_mqtt::Backoff;
//!
//! let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
//! assert_eq!(backoff.next_delay(), Duration::from_millis(100));
//! assert_eq!(backoff.next_delay(), Duration::from_millis(200));
//! backoff.reset();
//! assert_eq!(backoff.next_delay(), Duration::from_millis(100));
//! ```

use std::{
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
    time::Duration,
};

/// Doubling backoff controller shared between the timer and callback contexts.
#[derive(Debug)]
pub struct Backoff {
    /// The delay used after a reset, in milliseconds.
    initial_ms: u64,

    /// Upper bound for the delay, in milliseconds.
    max_ms: u64,

    /// Delay that the next `next_delay()` call returns.
    current_ms: AtomicU64,

    /// Reconnects scheduled since the last reset. Diagnostic only.
    attempt: AtomicU32,
}

impl Backoff {
    /// Creates a backoff starting at `initial` and capped at `max`.
    ///
    /// If `initial > max` the cap wins: every delay equals `max`. The
    /// subscriber builder rejects that combination before it gets here.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max_ms = duration_to_ms(max);
        let initial_ms = duration_to_ms(initial).min(max_ms);
        Self {
            initial_ms,
            max_ms,
            current_ms: AtomicU64::new(initial_ms),
            attempt: AtomicU32::new(0),
        }
    }

    /// Resets the delay to `initial`.
    ///
    /// Called on every successful manual connect.
    pub fn reset(&self) {
        self.current_ms.store(self.initial_ms, Ordering::Release);
        self.attempt.store(0, Ordering::Release);
    }

    /// Returns the delay to wait before the next attempt and doubles the
    /// stored delay (capped at `max`) in the same atomic step.
    ///
    /// Back-to-back calls therefore return a monotonically growing sequence
    /// even if none of the scheduled attempts has fired yet.
    pub fn next_delay(&self) -> Duration {
        let (initial, max) = (self.initial_ms, self.max_ms);
        let previous = self
            .current_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_mul(2).clamp(initial, max))
            })
            .unwrap_or_else(|current| current);
        self.attempt.fetch_add(1, Ordering::AcqRel);
        Duration::from_millis(previous)
    }

    /// Gets the delay the next `next_delay()` call will return.
    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.current_ms.load(Ordering::Acquire))
    }

    /// Gets the configured initial delay.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    /// Gets the configured maximum delay.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    /// Gets the number of reconnects scheduled since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::Acquire)
    }
}

impl Default for Backoff {
    /// 1 second initial delay, 60 seconds cap.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn test_backoff_default_creation() {
        let backoff = Backoff::default();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.current_delay(), Duration::from_secs(1));
        assert_eq!(backoff.max_delay(), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000));

        let delays: Vec<u64> = (0..7)
            .map(|_| backoff.next_delay().as_millis() as u64)
            .collect();

        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000, 1000]);
        assert_eq!(backoff.attempt(), 7);
    }

    #[test]
    fn test_backoff_reset() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000));

        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.current_delay(), Duration::from_millis(400));

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_initial_equals_max() {
        let backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(10));
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_inverted_bounds_clamp_to_max() {
        let backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(10));
        assert_eq!(backoff.initial_delay(), Duration::from_secs(10));
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_invariant_under_concurrency() {
        let backoff = Arc::new(Backoff::new(
            Duration::from_millis(5),
            Duration::from_millis(640),
        ));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let backoff = backoff.clone();
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        if i % 4 == 0 {
                            backoff.reset();
                        }
                        let delay = backoff.next_delay();
                        assert!(delay >= Duration::from_millis(5));
                        assert!(delay <= Duration::from_millis(640));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let current = backoff.current_delay();
        assert!(current >= backoff.initial_delay() && current <= backoff.max_delay());
    }
}
