use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use clap::error::ErrorKind;
use irradiate_bin::init_logging_with_progress;
use irradiate_core::target::ProcessTarget;
use irradiate_core::{Injector, InjectorConfig, StopReason};
use log::info;

/// Inject random single-bit flips into the memory of a running process.
///
/// Runs until the target process exits.
#[derive(Debug, Parser)]
#[command(version, about)]
struct CliArgs {
    /// Process ID of the target.
    target_pid: u32,
    /// Flip rate, measured in "bit flips per megabyte per second".
    flip_rate: f64,
}

fn main() -> Result<ExitCode> {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            println!("{}", e.render());
            return Ok(ExitCode::FAILURE);
        }
    };
    let progress = init_logging_with_progress()?;

    let config = InjectorConfig {
        flip_rate: args.flip_rate,
        ..Default::default()
    };
    let injector = Injector::builder(ProcessTarget::new(args.target_pid))
        .config(config)
        .progress(progress)
        .build()?;
    let report = injector.run();
    info!("Injection report: {}", serde_json::to_string(&report)?);

    match report.stop_reason {
        StopReason::TargetNotFound { .. } => Ok(ExitCode::SUCCESS),
    }
}
