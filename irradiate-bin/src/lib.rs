//! Support code for the `irradiate` executable.

use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

/// Installs `env_logger` (default level `info`) behind a progress display.
///
/// Log lines are printed above the progress bars instead of tearing them.
pub fn init_logging_with_progress() -> anyhow::Result<MultiProgress> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    Ok(progress)
}
