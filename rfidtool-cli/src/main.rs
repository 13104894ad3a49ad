//! rfidtool CLI - Command-line tool for testing and updating UHF RFID readers.
//!
//! ## Features
//!
//! - One-shot reader commands (inventory, auto read, version, user memory, write)
//! - Stress testing with live stability statistics
//! - Paginated firmware update with version check
//! - JSON output for scripting
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use commands::{
    completions::cmd_completions,
    cycle::{cmd_auto_read, cmd_read, cmd_read_user, cmd_version, cmd_write_tag},
    stress::cmd_stress,
    update::cmd_update,
};
use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress bars and colors should be used.
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Stopped by the user.
    #[error("{0}")]
    Cancelled(String),
    /// The reader or the operation reported a failure.
    #[error("{0}")]
    Failed(String),
}

/// Exit code for an error returned from a command.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Cancelled(_)) => 130,
        Some(CliError::Failed(_)) => 1,
        None if was_interrupted() => 130,
        None => 1,
    }
}

/// rfidtool - Test and update UHF RFID readers over a serial link.
///
/// Environment variables:
///   RFIDTOOL_PORT   - Default serial port
///   RFIDTOOL_BAUD   - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "rfidtool")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port the reader is attached to.
    #[arg(short, long, global = true, env = "RFIDTOOL_PORT")]
    port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, global = true, env = "RFIDTOOL_BAUD")]
    baud: Option<u32>,

    /// Reader address [default: 1].
    #[arg(long, global = true)]
    device_id: Option<u8>,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Inventory parameters shared by `read` and `stress`.
#[derive(Args, Debug, Clone, Default)]
struct ReadArgs {
    /// Antenna port [default: 0].
    #[arg(long)]
    antenna: Option<u8>,

    /// RF power [default: 33].
    #[arg(long)]
    power: Option<u16>,

    /// Device timeout in milliseconds [default: 3000].
    #[arg(long, value_name = "MS")]
    timeout: Option<u64>,

    /// Stop after this many records (0 = unbounded).
    #[arg(long)]
    max_records: Option<u32>,
}

/// Request repeated by `stress`.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum StressMode {
    /// Advanced inventory (64H).
    #[default]
    Read,
    /// Auto-power read (61H).
    AutoRead,
    /// Version query (35H).
    Version,
}

/// Bytes given as a hex string on the command line.
#[derive(Clone, Debug)]
struct HexData(Vec<u8>);

/// Arguments of `write-tag`.
#[derive(Args, Debug, Clone)]
struct WriteTagArgs {
    /// Data to write as hex, e.g. 1234ABCD.
    #[arg(value_parser = parse_hex_data)]
    data: HexData,

    /// Antenna port [default: 0].
    #[arg(long)]
    antenna: Option<u8>,

    /// RF power [default: 33].
    #[arg(long)]
    power: Option<u8>,

    /// Start word address (decimal or 0x hex).
    #[arg(long, default_value = "2", value_parser = parse_u8)]
    address: u8,

    /// Host timeout in milliseconds [default: 3000].
    #[arg(long, value_name = "MS")]
    timeout: Option<u64>,

    /// Print the outcome as JSON to stdout.
    #[arg(long)]
    json: bool,
}

/// Arguments of `stress`.
#[derive(Args, Debug, Clone)]
struct StressArgs {
    #[command(flatten)]
    read: ReadArgs,

    /// Command to repeat.
    #[arg(long, value_enum, default_value = "read")]
    mode: StressMode,

    /// Number of cycles [default: 100].
    #[arg(long)]
    cycles: Option<u32>,

    /// Pause between cycles in milliseconds [default: 0].
    #[arg(long, value_name = "MS")]
    interval: Option<u64>,

    /// Stop at the first cycle that does not succeed.
    #[arg(long)]
    stop_on_error: bool,

    /// Print the report as JSON to stdout.
    #[arg(long)]
    json: bool,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run one inventory with explicit power (64H).
    Read {
        #[command(flatten)]
        read: ReadArgs,

        /// Print the outcome as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Read one tag at automatic power (61H).
    AutoRead {
        /// Antenna port [default: 0].
        #[arg(long)]
        antenna: Option<u8>,

        /// Host timeout in milliseconds [default: 3000].
        #[arg(long, value_name = "MS")]
        timeout: Option<u64>,

        /// Print the outcome as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Query the reader firmware version (35H).
    Version {
        /// Host timeout in milliseconds [default: 3000].
        #[arg(long, value_name = "MS")]
        timeout: Option<u64>,

        /// Print the outcome as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Read tag user memory (63H).
    ReadUser {
        /// Start word address (decimal or 0x hex).
        #[arg(long, default_value = "0", value_parser = parse_u16)]
        address: u16,

        /// Number of words to read.
        #[arg(long, default_value = "2")]
        words: u16,

        /// Host timeout in milliseconds [default: 3000].
        #[arg(long, value_name = "MS")]
        timeout: Option<u64>,

        /// Print the outcome as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Write data to a tag (70H).
    WriteTag(WriteTagArgs),

    /// Repeat a command and report stability.
    Stress(StressArgs),

    /// Update the reader firmware.
    Update {
        /// Firmware image file.
        firmware: PathBuf,

        /// Version the reader must report after the update.
        #[arg(long, value_name = "VERSION")]
        expect_version: Option<String>,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse an integer given in decimal or with a 0x prefix.
fn parse_u32_auto(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = match s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("Invalid number '{s}': {e}"))
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let value = parse_u32_auto(s)?;
    u16::try_from(value).map_err(|_| format!("{value} does not fit in 16 bits"))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    let value = parse_u32_auto(s)?;
    u8::try_from(value).map_err(|_| format!("{value} does not fit in 8 bits"))
}

/// Parse hex data (spaces and underscores allowed, even digit count).
fn parse_hex_data(s: &str) -> Result<HexData, String> {
    let digits: String = s
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .collect();

    if digits.is_empty() {
        return Err("Data must not be empty".to_string());
    }
    if let Some(bad) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(format!("Invalid hex digit '{bad}' in '{s}'"));
    }
    if digits.len() % 2 != 0 {
        return Err(format!("Odd number of hex digits in '{s}'"));
    }
    if digits.len() / 2 > rfidtool::MAX_WRITE_BYTES {
        return Err(format!(
            "Data is {} bytes, a single write takes at most {}",
            digits.len() / 2,
            rfidtool::MAX_WRITE_BYTES
        ));
    }

    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .map_err(|e| e.to_string())
                .and_then(|pair| u8::from_str_radix(pair, 16).map_err(|e| e.to_string()))
                .map_err(|e| format!("Invalid hex data '{s}': {e}"))
        })
        .collect::<Result<Vec<u8>, String>>()
        .map(HexData)
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    rfidtool::set_interrupt_checker(was_interrupted);
}

fn main() {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    install_interrupt_handler();

    debug!(
        "rfidtool v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code_for(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Read { read, json } => cmd_read(cli, &config, read, *json),
        Commands::AutoRead {
            antenna,
            timeout,
            json,
        } => cmd_auto_read(cli, &config, *antenna, *timeout, *json),
        Commands::Version { timeout, json } => cmd_version(cli, &config, *timeout, *json),
        Commands::ReadUser {
            address,
            words,
            timeout,
            json,
        } => cmd_read_user(cli, &config, *address, *words, *timeout, *json),
        Commands::WriteTag(args) => cmd_write_tag(cli, &config, args),
        Commands::Stress(args) => cmd_stress(cli, &config, args),
        Commands::Update {
            firmware,
            expect_version,
        } => cmd_update(cli, &config, firmware, expect_version.as_deref()),
        Commands::Completions { shell } => {
            cmd_completions(*shell);
            Ok(())
        },
    }
}
