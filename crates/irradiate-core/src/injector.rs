//! The injection loop.

use std::fmt;
use std::thread;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::info;
use serde::Serialize;
use thiserror::Error;

use crate::flip::flip_one;
use crate::observer::{InjectionObserver, LogObserver};
use crate::schedule::{FlipSchedule, RateScheduler};
use crate::target::{Target, TargetError};
use crate::util::{
    IDLE_INTERVAL, MAX_FLIP_RETRIES, MIN_INTERVAL, NamedProgress, RETRY_BACKOFF, Rng, Size,
};

/// Configuration parameters for an injection run.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectorConfig {
    /// Flips per mebibyte of readable memory per second
    pub flip_rate: f64,
    /// Lower bound of the mean wait between two flip batches
    pub min_interval: Duration,
    /// Attempts per flip before it is abandoned
    pub max_flip_retries: usize,
    /// Wait before retrying a cycle that failed with a recoverable error
    pub retry_backoff: Duration,
    /// Wait after a cycle in which there was nothing to flip
    pub idle_interval: Duration,
    /// Seed for all random draws (None = random seed)
    pub seed: Option<u64>,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            flip_rate: 1.0,
            min_interval: MIN_INTERVAL,
            max_flip_retries: MAX_FLIP_RETRIES,
            retry_backoff: RETRY_BACKOFF,
            idle_interval: IDLE_INTERVAL,
            seed: None,
        }
    }
}

/// Why injection stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// The target process disappeared.
    TargetNotFound {
        /// Process identifier of the target
        pid: u32,
    },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::TargetNotFound { pid } => {
                write!(f, "target process {} not found - it probably died", pid)
            }
        }
    }
}

/// State of the injection loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectorState {
    /// Cycles are being executed
    Running,
    /// No further cycles will be executed
    Stopped(StopReason),
}

/// Counters accumulated over an injection run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InjectionStats {
    /// Completed cycles
    pub cycles: u64,
    /// Successful flips
    pub flips: u64,
    /// Flips given up after exhausting their attempts
    pub abandoned_flips: u64,
    /// Cycles that failed with a recoverable error
    pub cycle_errors: u64,
}

/// Outcome of a single completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Readable memory found in the target
    pub readable: Size,
    /// The planned flips, `None` if there was nothing to flip
    pub schedule: Option<FlipSchedule>,
    /// Successful flips
    pub flips: u64,
    /// Abandoned flips
    pub abandoned_flips: u64,
    /// Wait before the next cycle
    pub delay: Duration,
}

/// Summary of a finished injection run.
#[derive(Debug, Clone, Serialize)]
pub struct InjectionReport {
    /// Process identifier of the target
    pub pid: u32,
    /// Seed of the random number generator
    pub seed: u64,
    /// RFC 3339 timestamp of the start of the run
    pub started: String,
    /// RFC 3339 timestamp of the end of the run
    pub stopped: String,
    /// Accumulated counters
    #[serde(flatten)]
    pub stats: InjectionStats,
    /// Why the run ended
    pub stop_reason: StopReason,
}

/// Drives fault injection into a [`Target`].
///
/// Each cycle enumerates the target's readable memory, plans a batch of flips
/// with the [`RateScheduler`], opens the target's memory, performs the batch
/// and closes the memory again. [`run()`](Injector::run) repeats cycles with
/// exponentially distributed waits in between until the target disappears.
///
/// # Examples
///
/// ```no_run
/// use irradiate_core::injector::{Injector, InjectorConfig};
/// use irradiate_core::target::ProcessTarget;
///
/// let config = InjectorConfig {
///     flip_rate: 0.5,
///     ..Default::default()
/// };
/// let injector = Injector::builder(ProcessTarget::new(1234))
///     .config(config)
///     .build()
///     .unwrap();
/// let report = injector.run();
/// println!("{} flips", report.stats.flips);
/// ```
pub struct Injector<T: Target, O: InjectionObserver> {
    target: T,
    observer: O,
    scheduler: RateScheduler,
    rng: Rng,
    config: InjectorConfig,
    state: InjectorState,
    stats: InjectionStats,
    progress: Option<ProgressBar>,
}

impl<T: Target> Injector<T, LogObserver> {
    /// Creates a new builder for injecting into `target`.
    ///
    /// Events are logged through [`LogObserver`] unless another observer is set.
    pub fn builder(target: T) -> InjectorBuilder<T, LogObserver> {
        InjectorBuilder {
            target,
            observer: LogObserver,
            config: InjectorConfig::default(),
            progress: None,
        }
    }
}

impl<T: Target, O: InjectionObserver> Injector<T, O> {
    /// Current state of the injection loop.
    pub fn state(&self) -> &InjectorState {
        &self.state
    }

    /// Returns `true` while further cycles will be executed.
    pub fn is_running(&self) -> bool {
        self.state == InjectorState::Running
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> InjectionStats {
        self.stats
    }

    /// The observer receiving injection events.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// The target being injected into.
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Seed of the random number generator.
    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }

    /// Executes a single cycle without waiting afterwards.
    ///
    /// Returns the wait before the next cycle is due as part of the
    /// [`CycleReport`].
    ///
    /// # Errors
    ///
    /// * [`TargetError::TargetNotFound`] if the target has disappeared. The
    ///   injector is [`Stopped`](InjectorState::Stopped) afterwards.
    /// * [`TargetError::Parse`] or [`TargetError::TransientIo`] if this cycle
    ///   failed but the next one may succeed. The injector keeps running.
    pub fn cycle(&mut self) -> Result<CycleReport, TargetError> {
        if let InjectorState::Stopped(StopReason::TargetNotFound { pid }) = self.state {
            return Err(TargetError::TargetNotFound { pid });
        }
        let result = self.run_cycle();
        match &result {
            Ok(_) => {}
            Err(TargetError::TargetNotFound { pid }) => {
                self.stop(StopReason::TargetNotFound { pid: *pid })
            }
            Err(e) => {
                self.stats.cycle_errors += 1;
                self.observer.cycle_failed(e);
            }
        }
        result
    }

    fn run_cycle(&mut self) -> Result<CycleReport, TargetError> {
        let regions = self.target.regions()?;
        self.observer.regions_discovered(&regions);

        let schedule = self.scheduler.schedule(regions.total_size().mib());
        let delay = match &schedule {
            Some(schedule) => schedule.sample_delay(&mut self.rng),
            None => self.config.idle_interval,
        };
        self.observer.schedule_planned(schedule.as_ref(), delay);

        let mut report = CycleReport {
            readable: regions.total_size(),
            schedule,
            flips: 0,
            abandoned_flips: 0,
            delay,
        };
        if let Some(schedule) = schedule {
            // closed when dropped at the end of the batch
            let mut memory = self.target.open_memory()?;
            for _ in 0..schedule.batch_size {
                match flip_one(
                    &mut memory,
                    &regions,
                    &mut self.rng,
                    self.config.max_flip_retries,
                    &mut self.observer,
                ) {
                    Ok(_) => report.flips += 1,
                    Err(_) => report.abandoned_flips += 1,
                }
            }
        }

        self.stats.cycles += 1;
        self.stats.flips += report.flips;
        self.stats.abandoned_flips += report.abandoned_flips;
        if let Some(progress) = &self.progress {
            progress.set_position(self.stats.flips);
            if self.stats.abandoned_flips > 0 {
                progress.set_message(format!("{} abandoned", self.stats.abandoned_flips));
            }
        }
        Ok(report)
    }

    fn stop(&mut self, reason: StopReason) {
        self.observer.stopped(&reason);
        if let Some(progress) = &self.progress {
            progress.finish_with_message(reason.to_string());
        }
        self.state = InjectorState::Stopped(reason);
    }

    /// Runs one cycle and returns how long to wait before the next one.
    fn step(&mut self) -> Duration {
        match self.cycle() {
            Ok(report) => report.delay,
            Err(TargetError::TargetNotFound { .. }) => Duration::ZERO,
            Err(_) => self.config.retry_backoff,
        }
    }

    /// Injects faults until the target disappears.
    ///
    /// Blocks the calling thread for the whole run.
    pub fn run(mut self) -> InjectionReport {
        let started = chrono::Local::now().to_rfc3339();
        info!(
            "Injecting {} flips/MiB/s into process {} (seed {:#x})",
            self.scheduler.flip_rate(),
            self.target.pid(),
            self.rng.seed()
        );
        let stop_reason = loop {
            if let InjectorState::Stopped(reason) = &self.state {
                break reason.clone();
            }
            let wait = self.step();
            if self.is_running() {
                thread::sleep(wait);
            }
        };
        InjectionReport {
            pid: self.target.pid(),
            seed: self.rng.seed(),
            started,
            stopped: chrono::Local::now().to_rfc3339(),
            stats: self.stats,
            stop_reason,
        }
    }
}

/// Errors raised when building an [`Injector`].
#[derive(Debug, Error)]
pub enum BuildError {
    /// The configuration is not usable.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

/// Builder for [`Injector`].
pub struct InjectorBuilder<T: Target, O: InjectionObserver> {
    target: T,
    observer: O,
    config: InjectorConfig,
    progress: Option<MultiProgress>,
}

impl<T: Target, O: InjectionObserver> InjectorBuilder<T, O> {
    /// Sets the observer receiving injection events.
    pub fn observer<O1: InjectionObserver>(self, observer: O1) -> InjectorBuilder<T, O1> {
        InjectorBuilder {
            target: self.target,
            observer,
            config: self.config,
            progress: self.progress,
        }
    }

    /// Sets the configuration.
    pub fn config(mut self, config: InjectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Shows a running flip count in `progress`.
    pub fn progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Validates the configuration and creates the injector.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::InvalidConfig`] if the flip rate is not a
    /// positive finite number, the minimum interval is zero or no flip
    /// attempts are allowed.
    pub fn build(self) -> Result<Injector<T, O>, BuildError> {
        let config = self.config;
        if !(config.flip_rate.is_finite() && config.flip_rate > 0.0) {
            return Err(BuildError::InvalidConfig(format!(
                "flip rate must be a positive number, got {}",
                config.flip_rate
            )));
        }
        if config.min_interval.is_zero() {
            return Err(BuildError::InvalidConfig(
                "minimum interval must not be zero".into(),
            ));
        }
        if config.max_flip_retries == 0 {
            return Err(BuildError::InvalidConfig(
                "at least one flip attempt must be allowed".into(),
            ));
        }
        let rng = match config.seed {
            Some(seed) => Rng::from_seed(seed),
            None => Rng::from_random_seed(),
        };
        let progress = self.progress.map(|p| {
            let p = p.add(ProgressBar::new_spinner());
            p.set_style(ProgressStyle::named_counter("Flips injected"));
            p.enable_steady_tick(Duration::from_millis(250));
            p
        });
        Ok(Injector {
            target: self.target,
            observer: self.observer,
            scheduler: RateScheduler::new(config.flip_rate, config.min_interval),
            rng,
            config,
            state: InjectorState::Running,
            stats: InjectionStats::default(),
            progress,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, FakeMemory, FakeTarget, RecordingObserver};

    const MAPS: &str = "\
1000-1010 rw-p 00000000 00:00 0        [heap]
2000-3000 ---p 00000000 00:00 0
";

    // 225 flips per second on 16 bytes of readable memory, i.e. batches of 4
    const FLIP_RATE: f64 = 225.0 * 65536.0;

    fn injector(target: FakeTarget) -> Injector<FakeTarget, RecordingObserver> {
        Injector::builder(target)
            .observer(RecordingObserver::default())
            .config(InjectorConfig {
                flip_rate: FLIP_RATE,
                seed: Some(0x5eed),
                ..Default::default()
            })
            .build()
            .unwrap()
    }

    #[test]
    fn missing_target_stops_without_flipping() {
        let target = FakeTarget::new(None, FakeMemory::new(0, vec![]));
        let report = injector(target).run();

        assert_eq!(report.stop_reason, StopReason::TargetNotFound { pid: 4242 });
        assert_eq!(report.stats.flips, 0);
        assert_eq!(report.stats.cycles, 0);
        assert_eq!(report.seed, 0x5eed);
    }

    #[test]
    fn missing_target_transitions_to_stopped() {
        let target = FakeTarget::new(None, FakeMemory::new(0, vec![]));
        let mut injector = injector(target);
        assert!(injector.is_running());

        let result = injector.cycle();
        assert!(matches!(result, Err(TargetError::TargetNotFound { pid: 4242 })));
        assert_eq!(
            injector.state(),
            &InjectorState::Stopped(StopReason::TargetNotFound { pid: 4242 })
        );
        assert_eq!(injector.target().opens.get(), 0);
        assert_eq!(
            injector.observer().events,
            vec![Event::Stopped(StopReason::TargetNotFound { pid: 4242 })]
        );
        // stopped injectors stay stopped
        assert!(injector.cycle().unwrap_err().is_target_not_found());
    }

    #[test]
    fn cycle_flips_a_batch() {
        let memory = FakeMemory::new(0x1000, vec![0; 0x10]);
        let target = FakeTarget::new(Some(MAPS), memory.clone());
        let mut injector = injector(target);

        let report = injector.cycle().unwrap();
        assert_eq!(report.readable, Size::from_bytes(0x10));
        assert_eq!(report.schedule.map(|s| s.batch_size), Some(4));
        assert_eq!(report.flips, 4);
        assert_eq!(report.abandoned_flips, 0);
        assert_eq!(injector.target().opens.get(), 1);

        // replaying the recorded flips reproduces the target memory
        let flips = injector.observer().flips();
        assert_eq!(flips.len(), 4);
        let mut expected = vec![0u8; 0x10];
        for flip in flips {
            let idx = (flip.addr - 0x1000) as usize;
            assert_eq!(expected[idx], flip.data);
            expected[idx] ^= flip.bitmask;
        }
        assert_eq!(memory.bytes(), expected);
        assert_eq!(injector.stats().flips, 4);
    }

    #[test]
    fn tiny_rate_still_flips_with_a_clamped_delay() {
        let target = FakeTarget::new(Some(MAPS), FakeMemory::new(0x1000, vec![0; 0x10]));
        let mut injector = Injector::builder(target)
            .observer(RecordingObserver::default())
            .config(InjectorConfig {
                flip_rate: 1e-300,
                seed: Some(0x5eed),
                ..Default::default()
            })
            .build()
            .unwrap();

        let report = injector.cycle().unwrap();
        let schedule = report.schedule.unwrap();
        assert_eq!(schedule.batch_size, 1);
        assert_eq!(schedule.mean_interval, Duration::MAX);
        assert_eq!(report.flips, 1);
        assert!(report.delay > Duration::ZERO);
    }

    #[test]
    fn same_seed_same_flips() {
        let run = || {
            let memory = FakeMemory::new(0x1000, vec![0; 0x10]);
            let mut injector = injector(FakeTarget::new(Some(MAPS), memory.clone()));
            let delays = (0..5)
                .map(|_| injector.cycle().unwrap().delay)
                .collect::<Vec<_>>();
            (memory.bytes(), delays)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn no_readable_memory_skips_flipping() {
        let target = FakeTarget::new(
            Some("2000-3000 ---p 00000000 00:00 0\n"),
            FakeMemory::new(0, vec![]),
        );
        let mut injector = injector(target);

        let report = injector.cycle().unwrap();
        assert_eq!(report.schedule, None);
        assert_eq!(report.flips, 0);
        assert_eq!(report.delay, IDLE_INTERVAL);
        assert_eq!(injector.target().opens.get(), 0);
        assert!(injector.is_running());
    }

    #[test]
    fn transient_open_failure_is_retried() {
        let memory = FakeMemory::new(0x1000, vec![0; 0x10]);
        let target = FakeTarget::new(Some(MAPS), memory.clone());
        target.open_failures.set(1);
        let mut injector = injector(target);

        assert!(matches!(injector.cycle(), Err(TargetError::TransientIo(_))));
        assert!(injector.is_running());
        assert_eq!(injector.stats().cycle_errors, 1);
        assert!(memory.bytes().iter().all(|b| *b == 0));

        let report = injector.cycle().unwrap();
        assert_eq!(report.flips, 4);
        assert!(injector.observer().events.contains(&Event::CycleFailed));
    }

    #[test]
    fn parse_error_aborts_only_the_cycle() {
        let memory = FakeMemory::new(0x1000, vec![0; 0x10]);
        let target = FakeTarget::new(Some("garbage\n"), memory.clone());
        let mut injector = injector(target);

        assert!(matches!(injector.cycle(), Err(TargetError::Parse(_))));
        assert!(injector.is_running());
        assert_eq!(injector.target().opens.get(), 0);

        injector.target().maps.replace(Some(MAPS.to_string()));
        assert_eq!(injector.cycle().unwrap().flips, 4);
    }

    #[test]
    fn abandoned_flips_do_not_abort_the_batch() {
        let memory = FakeMemory::new(0x1000, vec![0; 0x10]);
        // first flip exhausts its attempts, the remaining three succeed
        memory.fail_next(MAX_FLIP_RETRIES);
        let mut injector = injector(FakeTarget::new(Some(MAPS), memory.clone()));

        let report = injector.cycle().unwrap();
        assert_eq!(report.abandoned_flips, 1);
        assert_eq!(report.flips, 3);
        assert!(injector.is_running());
    }

    #[test]
    fn target_exit_between_cycles_stops_the_run() {
        let memory = FakeMemory::new(0x1000, vec![0; 0x10]);
        let mut injector = injector(FakeTarget::new(Some(MAPS), memory));
        injector.cycle().unwrap();
        injector.target().exit();

        assert!(injector.cycle().unwrap_err().is_target_not_found());
        assert!(!injector.is_running());
        assert_eq!(injector.stats().cycles, 1);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        for flip_rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let result = Injector::builder(FakeTarget::new(None, FakeMemory::new(0, vec![])))
                .config(InjectorConfig {
                    flip_rate,
                    ..Default::default()
                })
                .build();
            assert!(matches!(result, Err(BuildError::InvalidConfig(_))));
        }
        let result = Injector::builder(FakeTarget::new(None, FakeMemory::new(0, vec![])))
            .config(InjectorConfig {
                max_flip_retries: 0,
                ..Default::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn report_serializes_flat() -> anyhow::Result<()> {
        let target = FakeTarget::new(None, FakeMemory::new(0, vec![]));
        let report = injector(target).run();
        let json = serde_json::to_value(&report)?;
        assert_eq!(json["pid"], 4242);
        assert_eq!(json["flips"], 0);
        assert_eq!(json["stop_reason"]["TargetNotFound"]["pid"], 4242);
        Ok(())
    }
}
