//! Stress test command.

use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use rfidtool::{CycleCommand, CycleConfig, OutcomeStatus, StressConfig, run_stress_test};
use std::time::Duration;

use super::{antenna, device_id, open_link, power, timeout};
use crate::config::Config;
use crate::{Cli, CliError, StressArgs, StressMode, use_fancy_output, was_interrupted};

/// Default number of cycles.
const DEFAULT_CYCLES: u32 = 100;

/// Build the repeated request for `mode`.
fn stress_command(args: &StressArgs, config: &Config) -> CycleCommand {
    match args.mode {
        StressMode::Read => CycleCommand::AdvancedRead {
            antenna: antenna(args.read.antenna, config),
            power: power(args.read.power, config),
            max_records: args
                .read
                .max_records
                .or(config.reader.max_records),
        },
        StressMode::AutoRead => CycleCommand::AutoPowerRead {
            antenna: antenna(args.read.antenna, config),
        },
        StressMode::Version => CycleCommand::ReadVersion,
    }
}

/// `stress`: run a command repeatedly and report stability.
pub(crate) fn cmd_stress(cli: &Cli, config: &Config, args: &StressArgs) -> Result<()> {
    let cycle = CycleConfig::new(device_id(cli, config), stress_command(args, config))
        .with_timeout(timeout(args.read.timeout, config));
    let cycles = args
        .cycles
        .or(config.stress.cycles)
        .unwrap_or(DEFAULT_CYCLES);
    let interval = Duration::from_millis(
        args.interval
            .or(config.stress.interval_ms)
            .unwrap_or(0),
    );
    let stress = StressConfig::new(cycle, cycles)
        .with_interval(interval)
        .with_stop_on_error(args.stop_on_error || config.stress.stop_on_error);

    let mut link = open_link(cli, config)?;

    let pb = if cli.quiet || args.json || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(u64::from(cycles));
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let report = run_stress_test(&mut link, &stress, &was_interrupted, |outcome, stats| {
        pb.set_position(u64::from(stats.total));
        pb.set_message(format!(
            "{:.1}% ok, last {}",
            stats.stability_percent(),
            outcome.status
        ));
        if outcome.status != OutcomeStatus::Success {
            pb.suspend(|| {
                log::warn!(
                    "Cycle {}: {} {}",
                    outcome.cycle,
                    outcome.status,
                    outcome
                        .message
                        .as_deref()
                        .unwrap_or("")
                );
            });
        }
    })?;
    link.close()?;
    pb.finish_and_clear();

    let stats = report.stats;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !cli.quiet {
        eprintln!(
            "{} {}/{} succeeded ({:.1}%), {} failed, {} timed out",
            style("Stress:").bold(),
            stats.success,
            stats.total,
            stats.stability_percent(),
            stats.failure,
            stats.timeout
        );
        if report.stopped_early {
            eprintln!("{} stopped at the first error", style("!").yellow());
        }
    }

    if report.cancelled {
        return Err(CliError::Cancelled("Interrupted".to_string()).into());
    }
    if stats.success < stats.total {
        return Err(CliError::Failed(format!(
            "{} of {} cycles did not succeed",
            stats.total - stats.success,
            stats.total
        ))
        .into());
    }
    Ok(())
}
