//! Pacing of flips.
//!
//! A flip rate is given in flips per mebibyte of readable memory per second.
//! For the current amount of readable memory it translates into a mean time
//! between flips. Below [`MIN_INTERVAL`](crate::util::MIN_INTERVAL), flips are
//! grouped into batches so the per-cycle overhead does not dominate, and the
//! mean wait stays at the minimum.
//!
//! The actual wait between two batches is drawn from an exponential
//! distribution with that mean, making batches (not individual flips) the
//! events of a Poisson process.

use std::time::Duration;

use rand::Rng;
use rand::distr::Open01;
use serde::Serialize;

/// Flips to perform in one cycle and the mean wait after them.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FlipSchedule {
    /// Number of flips performed back-to-back (at least 1)
    pub batch_size: u64,
    /// Mean wait between two batches
    pub mean_interval: Duration,
}

impl FlipSchedule {
    /// Samples the wait before the next cycle.
    pub fn sample_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        exponential_delay(self.mean_interval, rng)
    }
}

/// Samples an exponentially distributed duration with the given mean.
///
/// Uses the inverse CDF, `-mean * ln(U)` for `U` uniform in `(0, 1)`.
/// Samples too large for a [`Duration`] are clamped to [`Duration::MAX`].
pub fn exponential_delay<R: Rng + ?Sized>(mean: Duration, rng: &mut R) -> Duration {
    let u: f64 = rng.sample(Open01);
    saturating_secs(-mean.as_secs_f64() * u.ln())
}

fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Converts a flip rate into per-cycle [`FlipSchedule`]s.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateScheduler {
    flip_rate: f64,
    min_interval: Duration,
}

impl RateScheduler {
    /// Creates a scheduler.
    ///
    /// # Arguments
    ///
    /// * `flip_rate` - Flips per mebibyte of readable memory per second
    /// * `min_interval` - Lower bound of the mean wait between batches
    pub fn new(flip_rate: f64, min_interval: Duration) -> Self {
        Self {
            flip_rate,
            min_interval,
        }
    }

    /// The configured flip rate.
    pub fn flip_rate(&self) -> f64 {
        self.flip_rate
    }

    /// Plans a cycle for `readable_mib` mebibytes of readable memory.
    ///
    /// Returns `None` if no flip is due at all, i.e. the resulting number of
    /// flips per second is zero. A mean interval too large for a [`Duration`]
    /// is clamped to [`Duration::MAX`].
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use irradiate_core::schedule::RateScheduler;
    ///
    /// let scheduler = RateScheduler::new(1000.0, Duration::from_millis(20));
    /// let schedule = scheduler.schedule(10.0).unwrap();
    /// assert_eq!(schedule.batch_size, 200);
    /// assert_eq!(schedule.mean_interval, Duration::from_millis(20));
    /// ```
    pub fn schedule(&self, readable_mib: f64) -> Option<FlipSchedule> {
        let flips_per_second = self.flip_rate * readable_mib;
        if !(flips_per_second > 0.0 && flips_per_second.is_finite()) {
            return None;
        }
        let mean_interval = 1.0 / flips_per_second;
        let min_interval = self.min_interval.as_secs_f64();
        if mean_interval < min_interval {
            // floor(min_interval / mean_interval)
            let batch_size = (min_interval * flips_per_second).floor() as u64;
            Some(FlipSchedule {
                batch_size: batch_size.max(1),
                mean_interval: self.min_interval,
            })
        } else {
            Some(FlipSchedule {
                batch_size: 1,
                mean_interval: saturating_secs(mean_interval),
            })
        }
    }
}
