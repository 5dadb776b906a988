//! Diagnostic sink for injection events.
//!
//! Components report what they do to an [`InjectionObserver`] handed to them
//! by the caller instead of logging directly. [`LogObserver`] forwards every
//! event to the `log` facade.

use std::time::Duration;

use log::{debug, error, info, warn};

use crate::flip::{BitFlip, FlipError};
use crate::injector::StopReason;
use crate::region::RegionSet;
use crate::schedule::FlipSchedule;
use crate::target::TargetError;

/// Receiver of injection events.
///
/// All methods default to doing nothing, so implementors only override the
/// events they care about.
pub trait InjectionObserver {
    /// The readable memory of the target was enumerated.
    fn regions_discovered(&mut self, _regions: &RegionSet) {}

    /// The flips of the current cycle were planned.
    ///
    /// `schedule` is `None` if no flips are performed in this cycle; `delay`
    /// is the wait before the next cycle.
    fn schedule_planned(&mut self, _schedule: Option<&FlipSchedule>, _delay: Duration) {}

    /// A bit was flipped.
    fn flip_succeeded(&mut self, _flip: &BitFlip) {}

    /// Attempt number `attempt` (starting at 1) of a flip failed and will be
    /// retried if attempts remain.
    fn flip_attempt_failed(&mut self, _attempt: usize, _error: &FlipError) {}

    /// A flip was given up after exhausting all attempts.
    fn flip_abandoned(&mut self, _error: &FlipError) {}

    /// A cycle failed with a recoverable error and will be retried.
    fn cycle_failed(&mut self, _error: &TargetError) {}

    /// Injection stopped for good.
    fn stopped(&mut self, _reason: &StopReason) {}
}

/// Observer that writes all events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl InjectionObserver for LogObserver {
    fn regions_discovered(&mut self, regions: &RegionSet) {
        info!("found {} of readable memory", regions.total_size());
    }

    fn schedule_planned(&mut self, schedule: Option<&FlipSchedule>, delay: Duration) {
        match schedule {
            Some(schedule) => info!(
                "will perform {} flips and then wait {:.2} seconds ({:.2} average)",
                schedule.batch_size,
                delay.as_secs_f64(),
                schedule.mean_interval.as_secs_f64()
            ),
            None => info!(
                "nothing to flip, waiting {:.2} seconds",
                delay.as_secs_f64()
            ),
        }
    }

    fn flip_succeeded(&mut self, flip: &BitFlip) {
        debug!(
            "flipped addr {:#x}, bit {}: 0x{:02x} -> 0x{:02x}",
            flip.addr,
            flip.bitmask.trailing_zeros(),
            flip.data,
            flip.flipped()
        );
    }

    fn flip_attempt_failed(&mut self, attempt: usize, error: &FlipError) {
        debug!(
            "flip attempt {} failed ({}), trying again at a different address...",
            attempt, error
        );
    }

    fn flip_abandoned(&mut self, error: &FlipError) {
        error!("{}, giving up on this flip", error);
    }

    fn cycle_failed(&mut self, error: &TargetError) {
        warn!("{} - hoping this is temporary and retrying...", error);
    }

    fn stopped(&mut self, reason: &StopReason) {
        error!("{}", reason);
    }
}
