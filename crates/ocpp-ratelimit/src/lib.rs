//! The connection rate limiter (spec §4.7): a token bucket per source
//! address, refilled linearly over a configured window.
//!
//! The `Clock` seam mirrors the teacher's habit of never calling
//! wall-clock time directly from logic that needs to be deterministically
//! tested (see `tor_rtmock::MockRuntime` backing `SleepProvider` in the
//! teacher's own test suites) — here scaled down to the one thing this
//! component needs, `now()`.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A source of the current time, abstracted so tests can control it.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token-bucket rate limiter, keyed by an arbitrary string (in practice
/// a remote address).
pub struct RateLimiter<C: Clock = SystemClock> {
    limit: u32,
    window: Duration,
    clock: C,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter<SystemClock> {
    /// A rate limiter using the real wall clock.
    pub fn new(limit: u32, window_ms: u64) -> Self {
        Self::with_clock(limit, window_ms, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    /// A rate limiter using a custom time source.
    pub fn with_clock(limit: u32, window_ms: u64, clock: C) -> Self {
        Self {
            limit,
            window: Duration::from_millis(window_ms.max(1)),
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Attempt to consume one token from `key`'s bucket. Returns `true`
    /// if the request is admitted, `false` if the bucket was empty.
    ///
    /// A key seen for the first time starts with a full bucket, so the
    /// very first request from any address is always admitted.
    pub fn check(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock().expect("lock poisoned");
        let bucket = buckets.entry(key.to_owned()).or_insert_with(|| Bucket {
            tokens: self.limit as f64,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let refill_rate = self.limit as f64 / self.window.as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * refill_rate).min(self.limit as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct ManualClock(StdMutex<Instant>);

    impl ManualClock {
        fn new() -> Self {
            Self(StdMutex::new(Instant::now()))
        }
        fn advance(&self, d: Duration) {
            let mut t = self.0.lock().unwrap();
            *t += d;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.0.lock().unwrap()
        }
    }

    #[test]
    fn exhausts_then_refuses() {
        let limiter = RateLimiter::with_clock(3, 1000, ManualClock::new());
        assert!(limiter.check("1.2.3.4"));
        assert!(limiter.check("1.2.3.4"));
        assert!(limiter.check("1.2.3.4"));
        assert!(!limiter.check("1.2.3.4"));
    }

    #[test]
    fn distinct_keys_have_independent_buckets() {
        let limiter = RateLimiter::with_clock(1, 1000, ManualClock::new());
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        assert!(limiter.check("b"));
    }

    #[test]
    fn refill_admits_again_after_window_elapses() {
        let clock = std::sync::Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(1, 1000, std::sync::Arc::clone(&clock));
        assert!(limiter.check("k"));
        assert!(!limiter.check("k"));

        clock.advance(Duration::from_millis(1000));
        assert!(limiter.check("k"));
    }
}
