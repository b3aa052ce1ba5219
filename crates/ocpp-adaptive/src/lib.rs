//! The optional adaptive limiter (spec §4.12): periodically samples CPU
//! and memory utilization and derives a multiplier that admission callers
//! (the bounded queue) can apply to their effective concurrency.
//!
//! `LoadSampler` is the seam: production code samples the real OS, tests
//! supply a scripted sequence. This is the same role `Runtime`/
//! `SleepProvider` play in the teacher's test suites — a trait boundary
//! specifically so the thing that's awkward to control in a real test
//! (wall-clock time there, OS load here) can be swapped out.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::Mutex;

/// A single CPU/memory utilization reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSample {
    /// CPU utilization, 0.0-100.0.
    pub cpu_percent: f64,
    /// Memory utilization, 0.0-100.0.
    pub mem_percent: f64,
}

/// Produces utilization samples on demand.
pub trait LoadSampler: Send + Sync {
    /// Take one sample of current load.
    fn sample(&self) -> LoadSample;
}

/// Thresholds and step sizes governing how the multiplier reacts.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveConfig {
    /// CPU utilization above which the limiter considers the system overloaded.
    pub cpu_threshold: f64,
    /// Memory utilization above which the limiter considers the system overloaded.
    pub mem_threshold: f64,
    /// Lower bound the multiplier may fall to.
    pub floor: f64,
    /// Per-sample recovery step once load is back under threshold.
    pub recovery_step: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: 80.0,
            mem_threshold: 80.0,
            floor: 0.25,
            recovery_step: 0.1,
        }
    }
}

/// An `adapted` event, emitted whenever [`AdaptiveLimiter::observe`]
/// changes the multiplier (spec §4.12).
#[derive(Debug, Clone, PartialEq)]
pub struct Adapted {
    /// The new multiplier.
    pub multiplier: f64,
    /// The CPU reading that produced this change.
    pub cpu_percent: f64,
    /// The memory reading that produced this change.
    pub mem_percent: f64,
}

/// Tracks the current admission multiplier, derived from a stream of
/// [`LoadSample`]s.
pub struct AdaptiveLimiter {
    config: AdaptiveConfig,
    multiplier: Mutex<f64>,
}

impl AdaptiveLimiter {
    /// A limiter starting at full multiplier (1.0).
    pub fn new(config: AdaptiveConfig) -> Self {
        Self {
            config,
            multiplier: Mutex::new(1.0),
        }
    }

    /// The current multiplier.
    pub fn multiplier(&self) -> f64 {
        *self.multiplier.lock().expect("lock poisoned")
    }

    /// Feed in one sample, updating the multiplier per spec §4.12:
    /// overload halves it (floored), otherwise it recovers by a fixed
    /// step (capped at 1.0). Returns `Some(Adapted)` iff the multiplier
    /// actually changed.
    pub fn observe(&self, sample: LoadSample) -> Option<Adapted> {
        let overloaded =
            sample.cpu_percent > self.config.cpu_threshold || sample.mem_percent > self.config.mem_threshold;

        let mut multiplier = self.multiplier.lock().expect("lock poisoned");
        let previous = *multiplier;
        *multiplier = if overloaded {
            (previous / 2.0).max(self.config.floor)
        } else {
            (previous + self.config.recovery_step).min(1.0)
        };

        if (*multiplier - previous).abs() < f64::EPSILON {
            return None;
        }

        let adapted = Adapted {
            multiplier: *multiplier,
            cpu_percent: sample.cpu_percent,
            mem_percent: sample.mem_percent,
        };
        tracing::debug!(multiplier = adapted.multiplier, cpu = adapted.cpu_percent, mem = adapted.mem_percent, "adaptive limiter adjusted");
        Some(adapted)
    }

    /// Sample `sampler` once and call [`AdaptiveLimiter::observe`] on the
    /// result.
    pub fn tick(&self, sampler: &dyn LoadSampler) -> Option<Adapted> {
        self.observe(sampler.sample())
    }

    /// Apply the current multiplier to a base concurrency value, always
    /// leaving at least 1 slot available.
    pub fn scale(&self, base_concurrency: usize) -> usize {
        ((base_concurrency as f64) * self.multiplier()).floor().max(1.0) as usize
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overload_halves_and_floors() {
        let limiter = AdaptiveLimiter::new(AdaptiveConfig::default());
        let hi = LoadSample {
            cpu_percent: 95.0,
            mem_percent: 10.0,
        };
        assert_eq!(limiter.observe(hi).unwrap().multiplier, 0.5);
        assert_eq!(limiter.observe(hi).unwrap().multiplier, 0.25);
        // Already at the floor: no further change, no event.
        assert!(limiter.observe(hi).is_none());
    }

    #[test]
    fn recovers_gradually_and_caps_at_one() {
        let limiter = AdaptiveLimiter::new(AdaptiveConfig::default());
        let hi = LoadSample { cpu_percent: 95.0, mem_percent: 0.0 };
        let lo = LoadSample { cpu_percent: 10.0, mem_percent: 10.0 };
        limiter.observe(hi);
        assert_eq!(limiter.multiplier(), 0.5);
        limiter.observe(lo);
        assert!((limiter.multiplier() - 0.6).abs() < 1e-9);
        for _ in 0..10 {
            limiter.observe(lo);
        }
        assert_eq!(limiter.multiplier(), 1.0);
    }

    #[test]
    fn scale_never_drops_to_zero() {
        let limiter = AdaptiveLimiter::new(AdaptiveConfig::default());
        limiter.observe(LoadSample { cpu_percent: 99.0, mem_percent: 99.0 });
        limiter.observe(LoadSample { cpu_percent: 99.0, mem_percent: 99.0 });
        assert_eq!(limiter.multiplier(), 0.25);
        assert_eq!(limiter.scale(2), 1);
    }
}
