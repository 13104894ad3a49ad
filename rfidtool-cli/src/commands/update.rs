//! Firmware update command.

use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use rfidtool::{FirmwareUpdater, UpdateEvent, UpdateOutcome, split_pages};
use std::fs;
use std::path::Path;

use super::{device_id, open_link};
use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output};

/// `update`: send a firmware image and verify the new version.
pub(crate) fn cmd_update(
    cli: &Cli,
    config: &Config,
    firmware: &Path,
    expect_version: Option<&str>,
) -> Result<()> {
    let image = fs::read(firmware)
        .with_context(|| format!("Failed to read firmware {}", firmware.display()))?;
    if image.is_empty() {
        bail!("Firmware {} is empty", firmware.display());
    }
    let pages = split_pages(&image).len();

    if !cli.quiet {
        eprintln!(
            "{} {} ({} bytes, {} pages)",
            style("Firmware:").bold(),
            firmware.display(),
            image.len(),
            pages
        );
    }

    let mut link = open_link(cli, config)?;

    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(pages as u64);
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

    let report = FirmwareUpdater::new(&mut link, device_id(cli, config)).run(
        &image,
        expect_version,
        |event| match event {
            UpdateEvent::Phase(phase) => pb.set_message(phase.to_string()),
            UpdateEvent::PageConfirmed { page, .. } => pb.set_position(*page as u64),
            UpdateEvent::Paused { page } => pb.set_message(format!("paused before page {page}")),
            UpdateEvent::Resumed { .. } => {},
            UpdateEvent::Restarting => pb.set_position(0),
        },
    )?;
    link.close()?;
    pb.finish_and_clear();

    match report.outcome {
        UpdateOutcome::Succeeded { version } => {
            if !cli.quiet {
                eprintln!(
                    "{} Reader now runs {} ({:.1} s)",
                    style("✓").green(),
                    style(version).bold(),
                    report.elapsed.as_secs_f64()
                );
            }
            Ok(())
        },
        UpdateOutcome::Failed(failure) => Err(CliError::Failed(format!(
            "Update failed after {}/{} pages: {failure}",
            report.confirmed_pages, report.total_pages
        ))
        .into()),
        UpdateOutcome::Aborted => Err(CliError::Cancelled("Update aborted".to_string()).into()),
    }
}
