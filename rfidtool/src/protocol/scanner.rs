//! Frame scanner for the growing receive buffer.
//!
//! The buffer is append-only and always scanned from the start. A frame whose
//! declared length runs past the end of the buffer stops the scan; it is
//! picked up on a later call once the rest of its bytes have arrived.

use {
    super::{
        HEADER_LEN, MAX_RESPONSE_BODY, RESPONSE_SOF, checksum,
        command::Command,
        response::{Packet, decode, spaced_hex},
    },
    byteorder::{BigEndian, ByteOrder},
    log::{debug, trace},
    std::collections::HashSet,
};

/// Extract every complete response frame for `expected` from `buffer`.
///
/// Frames for other commands, frames that fail the checksum and frames too
/// short for their command are skipped. Never fails.
pub fn scan(buffer: &[u8], expected: Command) -> Vec<Packet> {
    let mut packets = Vec::new();
    let mut pos = 0;

    while pos < buffer.len() {
        if buffer[pos] != RESPONSE_SOF {
            pos += 1;
            continue;
        }

        // Need SOF + length before anything can be said about this frame
        if buffer.len() - pos < HEADER_LEN {
            break;
        }

        let body_len = usize::from(BigEndian::read_u16(&buffer[pos + 1..pos + 3]));
        if !(3..=MAX_RESPONSE_BODY).contains(&body_len) {
            // Too short for CMD + ID + checksum or longer than any response
            pos += 1;
            continue;
        }

        let total = body_len + HEADER_LEN;
        if pos + total > buffer.len() {
            trace!(
                "Incomplete frame at {pos}: need {total} bytes, have {}",
                buffer.len() - pos
            );
            break;
        }

        let frame = &buffer[pos..pos + total];
        if !checksum::verify(frame) {
            debug!("Checksum mismatch at offset {pos}, resyncing");
            pos += 1;
            continue;
        }

        match decode(frame) {
            Some(packet) if packet.command == expected => {
                trace!("Frame {}: {}", packet.command, spaced_hex(frame));
                packets.push(packet);
            },
            Some(packet) => {
                trace!("Skipping {} frame while waiting for {expected}", packet.command);
            },
            None => {
                trace!("Skipping undecodable frame: {}", spaced_hex(frame));
            },
        }

        pos += total;
    }

    packets
}

/// Remembers which frames were already handed out during one run.
///
/// Frames are keyed by their raw bytes, so re-scanning a buffer that still
/// holds earlier frames only yields the new ones.
#[derive(Debug, Default)]
pub struct PacketTracker {
    seen: HashSet<Vec<u8>>,
}

impl PacketTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every frame seen so far.
    pub fn clear(&mut self) {
        self.seen.clear();
    }

    /// Number of distinct frames seen.
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Scan `buffer` and return only packets not returned before.
    pub fn fresh(&mut self, buffer: &[u8], expected: Command) -> Vec<Packet> {
        scan(buffer, expected)
            .into_iter()
            .filter(|packet| {
                self.seen
                    .insert(packet.raw.clone())
            })
            .collect()
    }
}
