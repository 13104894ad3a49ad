//! Response frame decoding.
//!
//! Payload lengths vary per command, so every field is located either from
//! the command byte (fixed header) or from the end of the frame (fixed tail).
//! The error code is always the two bytes before the checksum.
//!
//! ```text
//! 64H tag   SOF LEN(2) CMD ID 00 EPC(n) PC(2) TAGCRC(2) ANT RSSI INDEX(2) ERR(2) CHK
//! 64H done  SOF LEN(2) CMD ID 01 TOTAL(2) ERR(2) CHK
//! 61H       SOF LEN(2) CMD ID EPC(n) ERR(2) CHK
//! 35H       SOF LEN(2) CMD ID VERSION(n) ERR(2) CHK
//! 63H       SOF LEN(2) CMD ID ADDR(2) WORDS(2) DATA(n) ERR(2) CHK
//! 70H       SOF LEN(2) CMD ID ERR(2) CHK
//! F0H       SOF LEN(2) CMD ID ... CHK
//! F1H       SOF LEN(2) CMD ID PAGE(2) ERR(2) CHK
//! F2H       SOF LEN(2) CMD ID ERR(2) CHK
//! ```

use {
    super::{command::Command, error_code::ErrorCode},
    byteorder::{BigEndian, ByteOrder},
    std::fmt::Write as _,
};

/// Smallest frame that can hold `SOF LEN CMD ID CHK`.
pub const MIN_FRAME_LEN: usize = 6;

/// 64H status: one tag record follows.
pub const STATUS_TAG: u8 = 0x00;

/// 64H status: the inventory batch is finished.
pub const STATUS_DONE: u8 = 0x01;

/// Fixed bytes around the EPC in a 64H tag record.
pub const ADVANCED_TAG_OVERHEAD: usize = 17;

/// Length of a 64H batch-finished frame.
pub const ADVANCED_DONE_LEN: usize = 11;

/// Fixed bytes around the memory dump in a 63H response.
pub const USER_MEMORY_OVERHEAD: usize = 12;

/// Fixed bytes around the variable part of 61H and 35H responses.
const TAIL_ONLY_OVERHEAD: usize = 8;

/// Decoded response body, one variant per response kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// 64H, status 00: one tag seen during an inventory.
    TagRecord {
        /// Tag identifier.
        epc: Vec<u8>,
        /// Protocol control word.
        pc: u16,
        /// CRC reported by the tag.
        tag_crc: u16,
        /// Antenna that saw the tag.
        antenna: u8,
        /// Signal strength in dBm.
        rssi: i8,
        /// Running record index within the batch.
        index: u16,
        /// Error code.
        error: ErrorCode,
    },
    /// 64H, status 01: the inventory batch has finished.
    InventoryDone {
        /// Records reported in the batch.
        total: u16,
        /// Final error code.
        error: ErrorCode,
    },
    /// 61H: auto-power read result.
    AutoRead {
        /// Tag identifier, absent when no tag answered.
        epc: Option<Vec<u8>>,
        /// Error code.
        error: ErrorCode,
    },
    /// 35H: firmware version.
    Version {
        /// ASCII version string, trimmed.
        version: String,
        /// Error code.
        error: ErrorCode,
    },
    /// 63H: user memory contents.
    UserMemory {
        /// Echoed start address.
        address: u16,
        /// Echoed word count.
        words: u16,
        /// Raw memory bytes.
        data: Vec<u8>,
        /// Error code.
        error: ErrorCode,
    },
    /// 70H: write result.
    WriteTag {
        /// Error code.
        error: ErrorCode,
    },
    /// F0H: the reader entered update mode.
    UpdateEntered,
    /// F1H: page acknowledgment.
    PageAck {
        /// Echoed page counter.
        page: u16,
        /// Error code.
        error: ErrorCode,
    },
    /// F2H: finalize result.
    UpdateFinished {
        /// Error code.
        error: ErrorCode,
    },
}

impl Response {
    /// Error code carried by this response, if the kind has one.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::TagRecord { error, .. }
            | Self::InventoryDone { error, .. }
            | Self::AutoRead { error, .. }
            | Self::Version { error, .. }
            | Self::UserMemory { error, .. }
            | Self::WriteTag { error }
            | Self::PageAck { error, .. }
            | Self::UpdateFinished { error } => Some(*error),
            Self::UpdateEntered => None,
        }
    }

    /// Whether this response ends the wait for its command.
    ///
    /// Only 64H tag records are non-terminal: they stream in until the
    /// batch-finished frame.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::TagRecord { .. })
    }
}

/// One decoded response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Command byte of the frame.
    pub command: Command,
    /// Reader id.
    pub device_id: u8,
    /// Decoded body.
    pub response: Response,
    /// Exact frame bytes, SOF through checksum.
    pub raw: Vec<u8>,
}

impl Packet {
    /// Raw frame as spaced hex, for logs.
    pub fn raw_hex(&self) -> String {
        spaced_hex(&self.raw)
    }
}

/// Uppercase hex without separators, e.g. `"E2801160"`.
pub fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02X}");
    }
    out
}

/// Uppercase hex separated by spaces, e.g. `"08 00 05"`.
pub fn spaced_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decode a complete frame.
///
/// Returns `None` for unknown commands and for frames too short for their
/// command's fixed layout. The caller is responsible for framing and
/// checksum validation.
pub fn decode(frame: &[u8]) -> Option<Packet> {
    let len = frame.len();
    if len < MIN_FRAME_LEN {
        return None;
    }

    let command = Command::try_from(frame[3]).ok()?;
    let device_id = frame[4];
    let tail_error = ErrorCode::from([frame[len - 3], frame[len - 2]]);

    let response = match command {
        Command::AdvancedRead => match frame[5] {
            STATUS_TAG if len >= ADVANCED_TAG_OVERHEAD => {
                let epc_len = len - ADVANCED_TAG_OVERHEAD;
                let tail = &frame[6 + epc_len..];
                Response::TagRecord {
                    epc: frame[6..6 + epc_len].to_vec(),
                    pc: BigEndian::read_u16(&tail[0..2]),
                    tag_crc: BigEndian::read_u16(&tail[2..4]),
                    antenna: tail[4],
                    rssi: i8::from_be_bytes([tail[5]]),
                    index: BigEndian::read_u16(&tail[6..8]),
                    error: tail_error,
                }
            },
            STATUS_DONE if len >= ADVANCED_DONE_LEN => Response::InventoryDone {
                total: BigEndian::read_u16(&frame[len - 5..len - 3]),
                error: tail_error,
            },
            _ => return None,
        },
        Command::AutoPowerRead if len >= TAIL_ONLY_OVERHEAD => {
            let epc = &frame[5..len - 3];
            Response::AutoRead {
                epc: (!epc.is_empty()).then(|| epc.to_vec()),
                error: tail_error,
            }
        },
        Command::ReadVersion if len >= TAIL_ONLY_OVERHEAD => Response::Version {
            version: String::from_utf8_lossy(&frame[5..len - 3])
                .trim_matches(|c: char| c == '\0' || c.is_whitespace())
                .to_string(),
            error: tail_error,
        },
        Command::ReadUserMemory if len >= USER_MEMORY_OVERHEAD => Response::UserMemory {
            address: BigEndian::read_u16(&frame[5..7]),
            words: BigEndian::read_u16(&frame[7..9]),
            data: frame[9..len - 3].to_vec(),
            error: tail_error,
        },
        Command::WriteTag if len >= TAIL_ONLY_OVERHEAD => Response::WriteTag {
            error: ErrorCode::from([frame[5], frame[6]]),
        },
        Command::EnterUpdate => Response::UpdateEntered,
        Command::UpdatePage if len >= 10 => Response::PageAck {
            page: BigEndian::read_u16(&frame[5..7]),
            error: tail_error,
        },
        Command::FinishUpdate if len >= TAIL_ONLY_OVERHEAD => Response::UpdateFinished {
            error: tail_error,
        },
        _ => return None,
    };

    Some(Packet {
        command,
        device_id,
        response,
        raw: frame.to_vec(),
    })
}
