//! Reader wire protocol.
//!
//! ## Frame Format
//!
//! Requests and responses share one layout and differ only in the start byte:
//!
//! ```text
//! +-----+--------+-----+----+---------------+----------+
//! | SOF | Length | CMD | ID |    Payload    | Checksum |
//! +-----+--------+-----+----+---------------+----------+
//! |  1  | 2 (BE) |  1  | 1  |   variable    |    1     |
//! +-----+--------+-----+----+---------------+----------+
//! ```
//!
//! `Length` counts the bytes from `CMD` through `Checksum` inclusive, and the
//! checksum is the XOR of every byte before it.

pub mod checksum;
pub mod command;
pub mod error_code;
pub mod response;
pub mod scanner;

/// Start-of-frame byte for host → reader frames.
pub const REQUEST_SOF: u8 = 0x80;

/// Start-of-frame byte for reader → host frames.
pub const RESPONSE_SOF: u8 = 0x08;

/// Bytes in front of the command byte (SOF + 2 length bytes).
pub const HEADER_LEN: usize = 3;

/// Size of one firmware update page.
pub const PAGE_SIZE: usize = 512;

/// Largest LEN a reader response can carry. Anything above is a stray SOF.
pub const MAX_RESPONSE_BODY: usize = 1024;

// Re-export common types
pub use checksum::xor_checksum;
pub use command::{Command, CommandFrame, MAX_WRITE_BYTES, encode_frame};
pub use error_code::ErrorCode;
pub use response::{Packet, Response};
pub use scanner::{PacketTracker, scan};
