//! Single request/response cycle.
//!
//! One command goes out, then the receive buffer is polled until a frame
//! completes the command, the caller cancels, or the deadline passes. Every
//! cycle resolves to exactly one [`TestOutcome`]; only transport faults are
//! returned as errors.

use {
    crate::{
        error::{Error, Result},
        is_interrupted_requested,
        link::Link,
        protocol::{
            Command, CommandFrame, ErrorCode, PacketTracker, Response,
            response::hex_string,
        },
    },
    log::{debug, trace, warn},
    std::{
        collections::HashSet,
        fmt, thread,
        time::{Duration, Instant, SystemTime, UNIX_EPOCH},
    },
};

/// Default device-side timeout for one cycle.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Extra host-side wait on top of the device timeout.
pub const DEFAULT_RESPONSE_MARGIN: Duration = Duration::from_secs(1);

/// How often the receive buffer is re-scanned.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Request issued by one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleCommand {
    /// Inventory with explicit power (64H).
    AdvancedRead {
        /// Antenna port.
        antenna: u8,
        /// RF power.
        power: u16,
        /// Record cap; `None` reads until the device timeout.
        max_records: Option<u32>,
    },
    /// Single read at automatic power (61H).
    AutoPowerRead {
        /// Antenna port.
        antenna: u8,
    },
    /// Firmware version query (35H).
    ReadVersion,
    /// User memory read (63H).
    ReadUserMemory {
        /// Start word address.
        address: u16,
        /// Number of words.
        words: u16,
    },
    /// Tag write (70H).
    WriteTag {
        /// Antenna port.
        antenna: u8,
        /// RF power.
        power: u8,
        /// Start word address.
        address: u8,
        /// Bytes to write.
        data: Vec<u8>,
    },
}

impl CycleCommand {
    /// Wire command this request uses.
    pub fn command(&self) -> Command {
        match self {
            Self::AdvancedRead { .. } => Command::AdvancedRead,
            Self::AutoPowerRead { .. } => Command::AutoPowerRead,
            Self::ReadVersion => Command::ReadVersion,
            Self::ReadUserMemory { .. } => Command::ReadUserMemory,
            Self::WriteTag { .. } => Command::WriteTag,
        }
    }

    /// Request frame for reader `id`.
    ///
    /// `timeout` is passed to the device for commands that carry one.
    pub fn frame(&self, id: u8, timeout: Duration) -> CommandFrame {
        match self {
            Self::AdvancedRead {
                antenna,
                power,
                max_records,
            } => {
                let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
                CommandFrame::advanced_read(id, *antenna, *power, timeout_ms, *max_records)
            },
            Self::AutoPowerRead { antenna } => CommandFrame::auto_power_read(id, *antenna),
            Self::ReadVersion => CommandFrame::read_version(id),
            Self::ReadUserMemory { address, words } => {
                CommandFrame::read_user_memory(id, *address, *words)
            },
            Self::WriteTag {
                antenna,
                power,
                address,
                data,
            } => CommandFrame::write_tag(id, *antenna, *power, *address, data),
        }
    }

    fn power(&self) -> Option<u16> {
        match self {
            Self::AdvancedRead { power, .. } => Some(*power),
            Self::WriteTag { power, .. } => Some(u16::from(*power)),
            _ => None,
        }
    }

    fn max_records(&self) -> Option<u32> {
        match self {
            Self::AdvancedRead { max_records, .. } => *max_records,
            _ => None,
        }
    }
}

/// Parameters of one cycle.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// Reader address.
    pub device_id: u8,
    /// Request to send.
    pub command: CycleCommand,
    /// Device-side timeout.
    pub timeout: Duration,
    /// Added to `timeout` to form the host deadline.
    pub response_margin: Duration,
    /// Buffer re-scan interval.
    pub poll_interval: Duration,
}

impl CycleConfig {
    /// Config with default timing.
    pub fn new(device_id: u8, command: CycleCommand) -> Self {
        Self {
            device_id,
            command,
            timeout: DEFAULT_TIMEOUT,
            response_margin: DEFAULT_RESPONSE_MARGIN,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the device-side timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the host-side margin.
    #[must_use]
    pub fn with_response_margin(mut self, margin: Duration) -> Self {
        self.response_margin = margin;
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Total time a cycle waits for completion.
    pub fn deadline(&self) -> Duration {
        self.timeout + self.response_margin
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize), serde(rename_all = "lowercase"))]
pub enum OutcomeStatus {
    /// Completed with an OK code.
    Success,
    /// Completed with a device error code.
    Failure,
    /// No completion frame before the deadline.
    Timeout,
    /// Stopped by the caller.
    Cancelled,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Record of one executed cycle.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TestOutcome {
    /// 1-based cycle index.
    pub cycle: u32,
    /// Wall-clock start, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Command that was sent.
    pub command: Command,
    /// Classification.
    pub status: OutcomeStatus,
    /// Code from the completion frame.
    pub error_code: Option<ErrorCode>,
    /// Resolved message for a failure code.
    pub message: Option<String>,
    /// Number of distinct tags seen.
    pub tag_count: usize,
    /// Distinct tag identifiers as hex, in first-seen order.
    pub tags: Vec<String>,
    /// Version string or memory dump, when the command returns one.
    pub detail: Option<String>,
    /// Configured timeout.
    pub timeout_ms: u64,
    /// Configured power, for commands that take one.
    pub power: Option<u16>,
    /// Configured record cap.
    pub max_records: Option<u32>,
    /// Time from send to resolution.
    pub elapsed_ms: u64,
}

impl TestOutcome {
    /// Whether the cycle succeeded.
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Distinct tags in arrival order.
#[derive(Default)]
struct TagSet {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl TagSet {
    fn insert(&mut self, epc: &[u8]) {
        let hex = hex_string(epc);
        if self.seen.insert(hex.clone()) {
            debug!("New tag {hex}");
            self.order.push(hex);
        }
    }
}

struct Completion {
    code: ErrorCode,
    detail: Option<String>,
}

/// Run one cycle over `link`.
///
/// `cancel` is polled between scans, as is the global interrupt checker.
pub fn run_single_cycle<L: Link + ?Sized>(
    link: &mut L,
    config: &CycleConfig,
    cycle: u32,
    cancel: &dyn Fn() -> bool,
) -> Result<TestOutcome> {
    if !link.is_connected() {
        return Err(Error::Disconnected);
    }

    let command = config.command.command();
    let frame = config
        .command
        .frame(config.device_id, config.timeout)
        .build();

    let mut tracker = PacketTracker::new();
    let mut tags = TagSet::default();
    let mut completion = None;
    let mut cancelled = false;

    link.reset_buffer();
    let timestamp_ms = now_millis();
    let started = Instant::now();
    let deadline = started + config.deadline();

    debug!("Cycle {cycle}: sending {command} to reader {}", config.device_id);
    link.send(&frame)?;

    loop {
        if !link.is_connected() {
            return Err(Error::Disconnected);
        }

        for packet in tracker.fresh(&link.snapshot(), command) {
            trace!("Cycle {cycle}: {:?}", packet.response);
            completion = match packet.response {
                Response::TagRecord { epc, .. } => {
                    tags.insert(&epc);
                    None
                },
                Response::InventoryDone { error, .. } | Response::WriteTag { error } => {
                    Some(Completion {
                        code: error,
                        detail: None,
                    })
                },
                Response::AutoRead { epc, error } => {
                    if let Some(epc) = epc {
                        tags.insert(&epc);
                    }
                    Some(Completion {
                        code: error,
                        detail: None,
                    })
                },
                Response::Version { version, error } => Some(Completion {
                    code: error,
                    detail: Some(version),
                }),
                Response::UserMemory { data, error, .. } => Some(Completion {
                    code: error,
                    detail: Some(hex_string(&data)),
                }),
                _ => None,
            };
            if completion.is_some() {
                break;
            }
        }

        if completion.is_some() {
            break;
        }
        if cancel() || is_interrupted_requested() {
            cancelled = true;
            break;
        }
        if Instant::now() >= deadline {
            break;
        }
        thread::sleep(config.poll_interval);
    }

    let (status, error_code, message, detail) = match completion {
        Some(Completion { code, detail }) if code.is_ok() => {
            (OutcomeStatus::Success, Some(code), None, detail)
        },
        Some(Completion { code, detail }) => {
            debug!("Cycle {cycle}: device reported {code} ({})", code.message());
            (OutcomeStatus::Failure, Some(code), Some(code.message()), detail)
        },
        None if cancelled => (OutcomeStatus::Cancelled, None, None, None),
        None => {
            warn!(
                "Cycle {cycle}: no {command} completion within {} ms",
                config.deadline().as_millis()
            );
            (OutcomeStatus::Timeout, None, None, None)
        },
    };

    Ok(TestOutcome {
        cycle,
        timestamp_ms,
        command,
        status,
        error_code,
        message,
        tag_count: tags.order.len(),
        tags: tags.order,
        detail,
        timeout_ms: millis(config.timeout),
        power: config.command.power(),
        max_records: config.command.max_records(),
        elapsed_ms: millis(started.elapsed()),
    })
}

/// Sleep for `duration` in `step` slices, returning `false` if cancelled.
pub(crate) fn sleep_cancellable(
    duration: Duration,
    step: Duration,
    cancel: &dyn Fn() -> bool,
) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel() || is_interrupted_requested() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(step.min(deadline - now));
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, millis)
}
