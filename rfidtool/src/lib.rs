//! # rfidtool
//!
//! A library for driving UHF RFID readers over a serial link.
//!
//! This crate provides the host side of the reader's binary protocol:
//!
//! - Request frame building with XOR checksums
//! - Incremental scanning of a fragmented, growing receive buffer
//! - Single request/response cycles with timeout classification
//! - Repeated-cycle stress testing
//! - Paginated firmware update with pause, resume, cancel and version check
//!
//! ## Features
//!
//! - `native` (default): [`SerialLink::open`] over the `serialport` crate
//! - `serde`: `Serialize` on outcomes, stress reports and stats
//!
//! ## Example
//!
//! ```rust,no_run
//! use rfidtool::{CycleCommand, CycleConfig, SerialConfig, SerialLink, run_single_cycle};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let mut link = SerialLink::open(&SerialConfig::new("/dev/ttyUSB0", 115200))?;
//!
//!         let config = CycleConfig::new(1, CycleCommand::ReadVersion);
//!         let outcome = run_single_cycle(&mut link, &config, 1, &|| false)?;
//!         println!("{}: {:?}", outcome.status, outcome.detail);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod cycle;
pub mod error;
pub mod link;
pub mod port;
pub mod protocol;
pub mod stress;
pub mod update;

#[cfg(test)]
pub(crate) mod testing;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Install the process-wide stop hook.
///
/// Every bounded wait in the cycle, stress and update loops polls it between
/// sleeps; returning `true` ends the current operation as cancelled. Only the
/// first call takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// `true` once the installed stop hook fires. Always `false` without a hook.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    cycle::{CycleCommand, CycleConfig, OutcomeStatus, TestOutcome, run_single_cycle},
    error::{Error, Result},
    link::{Link, ReceiveBuffer, SerialLink},
    port::{Port, SerialConfig},
    protocol::{
        Command, CommandFrame, ErrorCode, MAX_WRITE_BYTES, Packet, PacketTracker, Response,
        encode_frame, scan, xor_checksum,
    },
    stress::{StressConfig, StressReport, StressStats, run_stress_test},
    update::{
        FirmwareUpdater, UpdateControl, UpdateEvent, UpdateFailure, UpdateOutcome, UpdatePhase,
        UpdateReport, UpdateTiming, page_matches, run_firmware_update, split_pages,
        versions_match,
    },
};
