//! One-shot reader commands.

use anyhow::Result;
use log::debug;
use rfidtool::{CycleCommand, CycleConfig, run_single_cycle};
use std::time::Duration;

use super::{
    antenna, device_id, open_link, outcome_result, power, report_outcome, timeout, write_power,
};
use crate::config::Config;
use crate::{Cli, WriteTagArgs, was_interrupted};

/// Send one request and report the outcome.
fn run_once(
    cli: &Cli,
    config: &Config,
    command: CycleCommand,
    timeout: Duration,
    json: bool,
) -> Result<()> {
    let cycle_config = CycleConfig::new(device_id(cli, config), command).with_timeout(timeout);
    debug!("Cycle config: {cycle_config:?}");

    let mut link = open_link(cli, config)?;
    let outcome = run_single_cycle(&mut link, &cycle_config, 1, &was_interrupted)?;
    link.close()?;

    report_outcome(cli, &outcome, json)?;
    if !json && outcome.is_success() {
        for tag in &outcome.tags {
            println!("{tag}");
        }
        if let Some(detail) = &outcome.detail {
            println!("{detail}");
        }
    }
    outcome_result(&outcome)
}

/// `read`: advanced inventory (64H).
pub(crate) fn cmd_read(cli: &Cli, config: &Config, read: &crate::ReadArgs, json: bool) -> Result<()> {
    let command = CycleCommand::AdvancedRead {
        antenna: antenna(read.antenna, config),
        power: power(read.power, config),
        max_records: read.max_records.or(config.reader.max_records),
    };
    run_once(cli, config, command, timeout(read.timeout, config), json)
}

/// `auto-read`: single read at automatic power (61H).
pub(crate) fn cmd_auto_read(
    cli: &Cli,
    config: &Config,
    antenna_arg: Option<u8>,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    let command = CycleCommand::AutoPowerRead {
        antenna: antenna(antenna_arg, config),
    };
    run_once(cli, config, command, timeout(timeout_ms, config), json)
}

/// `version`: firmware version query (35H).
pub(crate) fn cmd_version(
    cli: &Cli,
    config: &Config,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    run_once(
        cli,
        config,
        CycleCommand::ReadVersion,
        timeout(timeout_ms, config),
        json,
    )
}

/// `read-user`: user memory read (63H).
pub(crate) fn cmd_read_user(
    cli: &Cli,
    config: &Config,
    address: u16,
    words: u16,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    let command = CycleCommand::ReadUserMemory { address, words };
    run_once(cli, config, command, timeout(timeout_ms, config), json)
}

/// `write-tag`: tag write (70H).
pub(crate) fn cmd_write_tag(cli: &Cli, config: &Config, args: &WriteTagArgs) -> Result<()> {
    let power = write_power(args.power, config)?;
    let command = CycleCommand::WriteTag {
        antenna: antenna(args.antenna, config),
        power,
        address: args.address,
        data: args.data.0.clone(),
    };
    run_once(cli, config, command, timeout(args.timeout, config), args.json)
}
