//! Error types for rfidtool.
//!
//! Only faults that stop all further protocol progress are errors. Timeouts,
//! device-reported error codes and failed updates are typed outcomes instead.

use std::io;
use thiserror::Error;

/// Result type for rfidtool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for rfidtool operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port reads and writes).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The reader went away while an operation was in flight.
    #[error("Device disconnected")]
    Disconnected,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
