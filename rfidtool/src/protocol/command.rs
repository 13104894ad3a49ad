//! Request frame builders.
//!
//! Every builder is a pure function of its typed inputs: it allocates a frame
//! of the exact length, writes multi-byte fields big-endian and appends the XOR
//! checksum.

use {
    super::{HEADER_LEN, PAGE_SIZE, REQUEST_SOF, checksum::xor_checksum},
    byteorder::{BigEndian, WriteBytesExt},
    std::fmt,
};

/// Width of the target-EPC placeholder in a write request.
pub const TARGET_EPC_LEN: usize = 12;

/// Most data one write request can carry (255 words).
pub const MAX_WRITE_BYTES: usize = 2 * u8::MAX as usize;

/// Encoding of "no limit" for the advanced read record count.
pub const UNBOUNDED_RECORDS: u32 = 0xFFFF_FFFF;

/// Reader command bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum Command {
    /// Read firmware version (0x35).
    ReadVersion = 0x35,
    /// Auto-power tag read (0x61).
    AutoPowerRead = 0x61,
    /// Read user memory (0x63).
    ReadUserMemory = 0x63,
    /// Advanced tag read with power, timeout and record limit (0x64).
    AdvancedRead = 0x64,
    /// Write tag data (0x70).
    WriteTag = 0x70,
    /// Enter firmware update mode (0xF0).
    EnterUpdate = 0xF0,
    /// Transmit one firmware page (0xF1).
    UpdatePage = 0xF1,
    /// Finalize firmware update (0xF2).
    FinishUpdate = 0xF2,
}

impl Command {
    /// Raw command byte.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x35 => Ok(Self::ReadVersion),
            0x61 => Ok(Self::AutoPowerRead),
            0x63 => Ok(Self::ReadUserMemory),
            0x64 => Ok(Self::AdvancedRead),
            0x70 => Ok(Self::WriteTag),
            0xF0 => Ok(Self::EnterUpdate),
            0xF1 => Ok(Self::UpdatePage),
            0xF2 => Ok(Self::FinishUpdate),
            other => Err(other),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}H", self.code())
    }
}

/// Encode a complete frame: `SOF, LEN(2), CMD, ID, payload, CHECKSUM`.
///
/// Used with [`REQUEST_SOF`] for outbound commands; with
/// [`RESPONSE_SOF`](super::RESPONSE_SOF) it produces what the reader sends.
#[allow(clippy::cast_possible_truncation)] // Frames are far below 64KB
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn encode_frame(sof: u8, cmd: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    // CMD + ID + payload + checksum
    let body_len = payload.len() + 3;
    let mut buf = Vec::with_capacity(HEADER_LEN + body_len);

    buf.push(sof);
    buf.write_u16::<BigEndian>(body_len as u16)
        .unwrap();
    buf.push(cmd);
    buf.push(id);
    buf.extend_from_slice(payload);
    buf.push(xor_checksum(&buf));

    buf
}

/// Command frame builder.
#[derive(Debug, Clone)]
pub struct CommandFrame {
    cmd: Command,
    id: u8,
    data: Vec<u8>,
}

impl CommandFrame {
    /// Create an empty frame for `cmd` addressed to reader `id`.
    pub fn new(cmd: Command, id: u8) -> Self {
        Self {
            cmd,
            id,
            data: Vec::new(),
        }
    }

    /// Advanced tag read (64H).
    ///
    /// `max_records` of `None` or `Some(0)` means unbounded and is sent as
    /// `FFFFFFFF`.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn advanced_read(
        id: u8,
        antenna: u8,
        power: u16,
        timeout_ms: u32,
        max_records: Option<u32>,
    ) -> Self {
        let records = match max_records {
            None | Some(0) => UNBOUNDED_RECORDS,
            Some(n) => n,
        };

        let mut frame = Self::new(Command::AdvancedRead, id);
        frame.data.push(antenna);
        frame.data.write_u16::<BigEndian>(power).unwrap();
        frame.data.write_u32::<BigEndian>(timeout_ms).unwrap();
        frame.data.write_u32::<BigEndian>(records).unwrap();
        frame
    }

    /// Auto-power tag read (61H).
    pub fn auto_power_read(id: u8, antenna: u8) -> Self {
        let mut frame = Self::new(Command::AutoPowerRead, id);
        frame.data.push(antenna);
        frame
    }

    /// Read firmware version (35H).
    pub fn read_version(id: u8) -> Self {
        Self::new(Command::ReadVersion, id)
    }

    /// Read user memory (63H) starting at word `address`.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn read_user_memory(id: u8, address: u16, words: u16) -> Self {
        let mut frame = Self::new(Command::ReadUserMemory, id);
        frame.data.write_u16::<BigEndian>(address).unwrap();
        frame.data.write_u16::<BigEndian>(words).unwrap();
        frame
    }

    /// Write tag data (70H).
    ///
    /// Layout: antenna, power, 12-byte target EPC (zeroed, any tag), word
    /// address, word count, data. Total frame length is `22 + data.len()`.
    /// Data past [`MAX_WRITE_BYTES`] is cut so the word count stays exact.
    pub fn write_tag(id: u8, antenna: u8, power: u8, address: u8, data: &[u8]) -> Self {
        let data = &data[..data.len().min(MAX_WRITE_BYTES)];
        let words = u8::try_from(data.len().div_ceil(2)).unwrap_or(u8::MAX);

        let mut frame = Self::new(Command::WriteTag, id);
        frame.data.reserve(TARGET_EPC_LEN + 4 + data.len());
        frame.data.push(antenna);
        frame.data.push(power);
        frame.data.extend_from_slice(&[0u8; TARGET_EPC_LEN]);
        frame.data.push(address);
        frame.data.push(words);
        frame.data.extend_from_slice(data);
        frame
    }

    /// Enter firmware update mode (F0H).
    pub fn enter_update(id: u8) -> Self {
        Self::new(Command::EnterUpdate, id)
    }

    /// One firmware page (F1H).
    ///
    /// The page is always [`PAGE_SIZE`] bytes on the wire: short input is
    /// zero-padded and longer input is cut.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn update_page(id: u8, counter: u16, page: &[u8]) -> Self {
        let used = page.len().min(PAGE_SIZE);

        let mut frame = Self::new(Command::UpdatePage, id);
        frame.data.reserve(2 + PAGE_SIZE);
        frame.data.write_u16::<BigEndian>(counter).unwrap();
        frame.data.extend_from_slice(&page[..used]);
        frame.data.resize(2 + PAGE_SIZE, 0x00);
        frame
    }

    /// Finalize firmware update (F2H).
    pub fn finish_update(id: u8) -> Self {
        Self::new(Command::FinishUpdate, id)
    }

    /// Build the complete frame data.
    pub fn build(&self) -> Vec<u8> {
        encode_frame(REQUEST_SOF, self.cmd.code(), self.id, &self.data)
    }

    /// Get the command type.
    pub fn command(&self) -> Command {
        self.cmd
    }

    /// Get the addressed reader id.
    pub fn device_id(&self) -> u8 {
        self.id
    }
}
