//! Command implementations.
//!
//! Each subcommand is implemented in its own module; connection setup and
//! outcome reporting live here.

pub(crate) mod completions;
pub(crate) mod cycle;
pub(crate) mod stress;
pub(crate) mod update;

use anyhow::{Context, Result, anyhow};
use console::style;
use rfidtool::{NativePort, OutcomeStatus, SerialConfig, SerialLink, TestOutcome};
use std::time::Duration;

use crate::config::Config;
use crate::{Cli, CliError};

/// Default baud rate.
pub(crate) const DEFAULT_BAUD: u32 = 115_200;
/// Default reader address.
pub(crate) const DEFAULT_DEVICE_ID: u8 = 1;
/// Default antenna port.
pub(crate) const DEFAULT_ANTENNA: u8 = 0;
/// Default RF power.
pub(crate) const DEFAULT_POWER: u16 = 33;
/// Default per-command timeout.
pub(crate) const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// Reader address from the command line or config.
pub(crate) fn device_id(cli: &Cli, config: &Config) -> u8 {
    cli.device_id
        .or(config.reader.device_id)
        .unwrap_or(DEFAULT_DEVICE_ID)
}

/// Antenna from the command line or config.
pub(crate) fn antenna(arg: Option<u8>, config: &Config) -> u8 {
    arg.or(config.reader.antenna)
        .unwrap_or(DEFAULT_ANTENNA)
}

/// RF power from the command line or config.
pub(crate) fn power(arg: Option<u16>, config: &Config) -> u16 {
    arg.or(config.reader.power)
        .unwrap_or(DEFAULT_POWER)
}

/// Write power, which is a single byte on the wire.
pub(crate) fn write_power(arg: Option<u8>, config: &Config) -> Result<u8> {
    match arg {
        Some(power) => Ok(power),
        None => {
            let configured = power(None, config);
            u8::try_from(configured).map_err(|_| {
                anyhow!("Configured power {configured} is too high for write-tag (max 255)")
            })
        },
    }
}

/// Command timeout from the command line or config.
pub(crate) fn timeout(arg: Option<u64>, config: &Config) -> Duration {
    Duration::from_millis(
        arg.or(config.reader.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS),
    )
}

/// Open the serial link to the reader.
pub(crate) fn open_link(cli: &Cli, config: &Config) -> Result<SerialLink<NativePort>> {
    let port = cli
        .port
        .clone()
        .or_else(|| {
            config
                .connection
                .serial
                .clone()
        })
        .ok_or_else(|| anyhow!("No serial port given (use --port or set RFIDTOOL_PORT)"))?;
    let baud = cli
        .baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD);

    if !cli.quiet {
        eprintln!(
            "{} Using {} at {} baud",
            style("→").cyan(),
            style(&port).bold(),
            baud
        );
    }

    SerialLink::open(&SerialConfig::new(&port, baud))
        .with_context(|| format!("Failed to open serial port {port}"))
}

/// Print one outcome, to stdout as JSON or as a human summary on stderr.
pub(crate) fn report_outcome(cli: &Cli, outcome: &TestOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }

    let status = match outcome.status {
        OutcomeStatus::Success => style(outcome.status.to_string()).green(),
        OutcomeStatus::Failure | OutcomeStatus::Timeout => style(outcome.status.to_string()).red(),
        OutcomeStatus::Cancelled => style(outcome.status.to_string()).yellow(),
    };
    eprintln!(
        "{} {} in {} ms",
        status,
        outcome.command,
        outcome.elapsed_ms
    );
    if let Some(code) = outcome.error_code {
        eprintln!("    code:  {code} ({})", code.message());
    }
    if !outcome.tags.is_empty() {
        eprintln!("    tags:  {}", outcome.tag_count);
    }
    Ok(())
}

/// Turn a non-success outcome into the matching CLI error.
pub(crate) fn outcome_result(outcome: &TestOutcome) -> Result<()> {
    match outcome.status {
        OutcomeStatus::Success => Ok(()),
        OutcomeStatus::Failure => {
            let message = outcome
                .message
                .clone()
                .unwrap_or_default();
            Err(CliError::Failed(format!(
                "Reader reported {}: {message}",
                rfidtool::ErrorCode::display_opt(outcome.error_code)
            ))
            .into())
        },
        OutcomeStatus::Timeout => Err(CliError::Failed(format!(
            "No response to {} within the timeout",
            outcome.command
        ))
        .into()),
        OutcomeStatus::Cancelled => Err(CliError::Cancelled("Interrupted".to_string()).into()),
    }
}
