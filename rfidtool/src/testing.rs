//! Test doubles shared by the protocol state machine tests.

use {
    crate::{
        error::{Error, Result},
        link::Link,
        protocol::{
            Command, ErrorCode, RESPONSE_SOF, encode_frame,
            response::{STATUS_DONE, STATUS_TAG},
        },
    },
    std::{cell::RefCell, collections::VecDeque},
};

pub(crate) fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .try_init();
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>>>;

/// In-memory link whose device side is a closure.
///
/// Every sent frame is handed to the responder; the frames it returns are
/// queued and released `chunk` bytes per snapshot, so callers see the
/// replies arrive in fragments like on a real wire.
pub(crate) struct ScriptedLink {
    responder: Responder,
    pending: RefCell<VecDeque<u8>>,
    buffer: RefCell<Vec<u8>>,
    chunk: usize,
    pub sent: Vec<Vec<u8>>,
    pub connected: bool,
    pub resets: usize,
}

impl ScriptedLink {
    pub fn new(responder: impl FnMut(&[u8]) -> Vec<Vec<u8>> + 'static) -> Self {
        init_logging();
        Self {
            responder: Box::new(responder),
            pending: RefCell::new(VecDeque::new()),
            buffer: RefCell::new(Vec::new()),
            chunk: usize::MAX,
            sent: Vec::new(),
            connected: true,
            resets: 0,
        }
    }

    /// A link whose device never answers.
    pub fn silent() -> Self {
        Self::new(|_| Vec::new())
    }

    /// Release replies at most `chunk` bytes per snapshot.
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    /// Put bytes straight into the receive buffer.
    pub fn inject(&self, bytes: &[u8]) {
        self.buffer
            .borrow_mut()
            .extend_from_slice(bytes);
    }

    /// Sent frames for one command code.
    pub fn sent_for(&self, command: Command) -> Vec<&Vec<u8>> {
        self.sent
            .iter()
            .filter(|frame| request_command(frame) == command.code())
            .collect()
    }
}

impl Link for ScriptedLink {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::Disconnected);
        }
        self.sent.push(frame.to_vec());
        let replies = (self.responder)(frame);
        let mut pending = self.pending.borrow_mut();
        for reply in replies {
            pending.extend(reply);
        }
        Ok(())
    }

    fn snapshot(&self) -> Vec<u8> {
        let mut pending = self.pending.borrow_mut();
        let n = pending.len().min(self.chunk);
        let mut buffer = self.buffer.borrow_mut();
        buffer.extend(pending.drain(..n));
        buffer.clone()
    }

    fn reset_buffer(&mut self) {
        self.resets += 1;
        self.buffer
            .borrow_mut()
            .clear();
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Command code of a request frame.
pub(crate) fn request_command(frame: &[u8]) -> u8 {
    frame[3]
}

/// Page counter of an F1H request.
pub(crate) fn request_page(frame: &[u8]) -> u16 {
    u16::from_be_bytes([frame[5], frame[6]])
}

fn reply(command: Command, id: u8, payload: &[u8]) -> Vec<u8> {
    encode_frame(RESPONSE_SOF, command.code(), id, payload)
}

pub(crate) fn version_reply(id: u8, version: &str, code: ErrorCode) -> Vec<u8> {
    let mut payload = version.as_bytes().to_vec();
    payload.extend_from_slice(&code.0.to_be_bytes());
    reply(Command::ReadVersion, id, &payload)
}

pub(crate) fn tag_reply(id: u8, epc: &[u8], index: u16) -> Vec<u8> {
    let mut payload = vec![STATUS_TAG];
    payload.extend_from_slice(epc);
    payload.extend_from_slice(&[0x30, 0x00, 0x12, 0x34, 0x01, 0xC8]);
    payload.extend_from_slice(&index.to_be_bytes());
    payload.extend_from_slice(&[0x00, 0x00]);
    reply(Command::AdvancedRead, id, &payload)
}

pub(crate) fn done_reply(id: u8, total: u16, code: ErrorCode) -> Vec<u8> {
    let mut payload = vec![STATUS_DONE];
    payload.extend_from_slice(&total.to_be_bytes());
    payload.extend_from_slice(&code.0.to_be_bytes());
    reply(Command::AdvancedRead, id, &payload)
}

pub(crate) fn auto_read_reply(id: u8, epc: &[u8], code: ErrorCode) -> Vec<u8> {
    let mut payload = epc.to_vec();
    payload.extend_from_slice(&code.0.to_be_bytes());
    reply(Command::AutoPowerRead, id, &payload)
}

pub(crate) fn user_memory_reply(id: u8, address: u16, data: &[u8], code: ErrorCode) -> Vec<u8> {
    let words = u16::try_from(data.len() / 2).unwrap();
    let mut payload = address.to_be_bytes().to_vec();
    payload.extend_from_slice(&words.to_be_bytes());
    payload.extend_from_slice(data);
    payload.extend_from_slice(&code.0.to_be_bytes());
    reply(Command::ReadUserMemory, id, &payload)
}

pub(crate) fn write_reply(id: u8, code: ErrorCode) -> Vec<u8> {
    reply(Command::WriteTag, id, &code.0.to_be_bytes())
}

pub(crate) fn entered_reply(id: u8) -> Vec<u8> {
    reply(Command::EnterUpdate, id, &[])
}

pub(crate) fn page_reply(id: u8, page: u16, code: ErrorCode) -> Vec<u8> {
    let mut payload = page.to_be_bytes().to_vec();
    payload.extend_from_slice(&code.0.to_be_bytes());
    reply(Command::UpdatePage, id, &payload)
}

pub(crate) fn finished_reply(id: u8, code: ErrorCode) -> Vec<u8> {
    reply(Command::FinishUpdate, id, &code.0.to_be_bytes())
}
