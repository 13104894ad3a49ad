//! Port abstraction for serial communication.
//!
//! The protocol layer never touches a serial port directly. It talks to a
//! [`Link`](crate::link::Link), and the serial link is built on top of this
//! `Port` trait, so tests and other back ends can substitute their own byte
//! streams.
//!
//! ```text
//! +-----------------------+
//! |  cycle / stress /     |
//! |  update state machine |
//! +-----------+-----------+
//!             |
//!             v
//! +-----------+-----------+      +--------------------+
//! |   Link (SerialLink)   |<-----| reader thread      |
//! +-----------+-----------+      | (ReceiveBuffer)    |
//!             |                  +---------+----------+
//!             v                            |
//! +-----------+-----------+                |
//! |      Port trait       |<---------------+
//! +-----------+-----------+
//!             |
//!             v
//! +-----------+-----------+
//! | NativePort (serialport)|
//! +-----------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial line settings. Readers always run 8N1 without flow control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port_name: String,
    /// Line speed.
    pub baud_rate: u32,
    /// Upper bound on one blocking read in the reader thread.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Reader default speed.
    pub const DEFAULT_BAUD: u32 = 115_200;

    /// Settings for `port_name` at `baud_rate`.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_millis(50),
        }
    }

    /// Override the per-read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new(String::new(), Self::DEFAULT_BAUD)
    }
}

/// Byte port the serial link is built on.
pub trait Port: Read + Write + Send {
    /// Device path.
    fn name(&self) -> &str;

    /// Discard anything pending in the OS buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Open a second handle for a background reader.
    ///
    /// Reads on the returned handle must time out periodically so the reader
    /// can notice shutdown requests.
    fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>>;

    /// Release the device. Later I/O fails with `NotConnected`.
    fn close(&mut self) -> Result<()>;

    /// Write a whole frame and flush it out.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.write_all(buf)?;
        self.flush()?;
        Ok(())
    }
}

#[cfg(feature = "native")]
pub use native::NativePort;
