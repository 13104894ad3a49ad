//! Reader error codes.
//!
//! Every response ends with a 2-byte error code, shown as four hex digits.
//! Two codes mean success; everything else is a device-reported failure.

use std::fmt;

/// Device error code carried in the tail of a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize), serde(into = "String"))]
pub struct ErrorCode(pub u16);

/// Known codes and their messages.
const MESSAGES: &[(u16, &str)] = &[
    (0x0000, "Success"),
    (0x0001, "Operation complete"),
    (0x0101, "No tag in field"),
    (0x0102, "Access password error"),
    (0x0103, "Memory address overrun"),
    (0x0104, "Memory locked"),
    (0x0105, "Insufficient RF power for tag"),
    (0x0106, "Tag write failed"),
    (0x0201, "Antenna not connected"),
    (0x0202, "RF power out of range"),
    (0x0301, "Invalid parameter"),
    (0x0302, "Checksum error"),
    (0x0303, "Unsupported command"),
    (0x0304, "Frame length error"),
    (0x0401, "Update page out of sequence"),
    (0x0402, "Update image verification failed"),
    (0x0403, "Flash write failed"),
    (0x0404, "Not in update mode"),
];

impl ErrorCode {
    /// Plain success.
    pub const OK: Self = Self(0x0000);

    /// Success that also signals the operation has finished.
    pub const OK_COMPLETE: Self = Self(0x0001);

    /// Whether this is one of the two success codes.
    pub fn is_ok(self) -> bool {
        self == Self::OK || self == Self::OK_COMPLETE
    }

    /// Four uppercase hex digits, e.g. `"0104"`.
    pub fn as_hex(self) -> String {
        format!("{:04X}", self.0)
    }

    /// Human-readable message, or the raw hex code when unknown.
    pub fn message(self) -> String {
        MESSAGES
            .iter()
            .find(|(code, _)| *code == self.0)
            .map_or_else(|| self.as_hex(), |(_, msg)| (*msg).to_string())
    }

    /// Parse four hex digits.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 4 {
            return None;
        }
        u16::from_str_radix(s, 16)
            .ok()
            .map(Self)
    }

    /// Render an optional code, using `"N/A"` when there is none.
    pub fn display_opt(code: Option<Self>) -> String {
        code.map_or_else(|| "N/A".to_string(), Self::as_hex)
    }
}

impl From<[u8; 2]> for ErrorCode {
    fn from(bytes: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(bytes))
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_hex()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}
