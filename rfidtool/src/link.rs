//! Transport link: outbound writes plus the shared receive buffer.
//!
//! A background reader thread is the only writer of the [`ReceiveBuffer`].
//! Protocol code only writes frames and takes snapshots; it resets the buffer
//! before each new request so stale bytes are never read as a fresh response.

use {
    crate::{
        error::{Error, Result},
        port::Port,
        protocol::response::spaced_hex,
    },
    log::{debug, trace, warn},
    std::{
        io::{ErrorKind, Read},
        sync::{
            Arc, Mutex, MutexGuard, PoisonError,
            atomic::{AtomicBool, Ordering},
        },
        thread::{self, JoinHandle},
    },
};

/// Size of one read from the port.
const READ_CHUNK: usize = 1024;

/// Append-only byte store shared between the reader thread and the protocol.
#[derive(Debug, Clone, Default)]
pub struct ReceiveBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl ReceiveBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append newly received bytes.
    pub fn append(&self, bytes: &[u8]) {
        self.lock()
            .extend_from_slice(bytes);
    }

    /// Copy of everything received since the last reset.
    pub fn snapshot(&self) -> Vec<u8> {
        self.lock()
            .clone()
    }

    /// Drop all bytes and start again empty.
    pub fn reset(&self) {
        self.lock()
            .clear();
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.lock()
            .len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transport as seen by the protocol state machines.
pub trait Link {
    /// Write one complete frame.
    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Snapshot of the receive buffer.
    fn snapshot(&self) -> Vec<u8>;

    /// Discard everything received so far.
    fn reset_buffer(&mut self);

    /// Whether the transport is still usable.
    fn is_connected(&self) -> bool;
}

/// Serial link with a background reader thread.
pub struct SerialLink<P: Port> {
    port: P,
    buffer: ReceiveBuffer,
    connected: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl<P: Port> SerialLink<P> {
    /// Start a link over an open port.
    ///
    /// Spawns the reader thread on a cloned handle of `port`.
    pub fn new(port: P) -> Result<Self> {
        let reader_port = port.try_clone_reader()?;
        let buffer = ReceiveBuffer::new();
        let connected = Arc::new(AtomicBool::new(true));
        let running = Arc::new(AtomicBool::new(true));

        let reader = {
            let buffer = buffer.clone();
            let connected = Arc::clone(&connected);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("rfid-reader".into())
                .spawn(move || read_loop(reader_port, &buffer, &connected, &running))?
        };

        debug!("Link started on {}", port.name());

        Ok(Self {
            port,
            buffer,
            connected,
            running,
            reader: Some(reader),
        })
    }

    /// Shared receive buffer.
    pub fn buffer(&self) -> &ReceiveBuffer {
        &self.buffer
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Stop the reader thread and close the port.
    pub fn close(&mut self) -> Result<()> {
        self.stop_reader();
        self.connected
            .store(false, Ordering::Relaxed);
        self.port.close()
    }

    fn stop_reader(&mut self) {
        self.running
            .store(false, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(feature = "native")]
impl SerialLink<crate::port::NativePort> {
    /// Open a native serial port and start a link on it.
    pub fn open(config: &crate::port::SerialConfig) -> Result<Self> {
        let mut port = crate::port::NativePort::open(config)?;
        port.clear_buffers()?;
        Self::new(port)
    }
}

impl<P: Port> Link for SerialLink<P> {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Disconnected);
        }

        trace!("TX {}", spaced_hex(frame));
        if let Err(e) = self.port.write_all_bytes(frame) {
            warn!("Write to {} failed: {e}", self.port.name());
            return Err(e);
        }
        Ok(())
    }

    fn snapshot(&self) -> Vec<u8> {
        self.buffer.snapshot()
    }

    fn reset_buffer(&mut self) {
        self.buffer.reset();
    }

    fn is_connected(&self) -> bool {
        self.connected
            .load(Ordering::Relaxed)
    }
}

impl<P: Port> Drop for SerialLink<P> {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

fn read_loop(
    mut reader: Box<dyn Read + Send>,
    buffer: &ReceiveBuffer,
    connected: &AtomicBool,
    running: &AtomicBool,
) {
    let mut chunk = [0u8; READ_CHUNK];

    while running.load(Ordering::Relaxed) {
        match reader.read(&mut chunk) {
            Ok(0) => {
                if running.load(Ordering::Relaxed) {
                    warn!("Serial port reached end of stream, link down");
                }
                break;
            },
            Ok(n) => {
                trace!("RX {}", spaced_hex(&chunk[..n]));
                buffer.append(&chunk[..n]);
            },
            Err(ref e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {},
            Err(e) => {
                if running.load(Ordering::Relaxed) {
                    warn!("Serial read failed, link down: {e}");
                }
                break;
            },
        }
    }

    connected.store(false, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Wire {
        incoming: VecDeque<u8>,
        written: Vec<u8>,
        broken: bool,
    }

    /// In-memory port: bytes pushed into `incoming` show up on the reader.
    struct FakePort {
        wire: Arc<Mutex<Wire>>,
    }

    struct FakeReader {
        wire: Arc<Mutex<Wire>>,
    }

    impl Read for FakeReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            {
                let mut wire = self.wire.lock().unwrap();
                if wire.broken {
                    return Err(std::io::Error::new(ErrorKind::BrokenPipe, "unplugged"));
                }
                if !wire.incoming.is_empty() {
                    let n = buf.len().min(wire.incoming.len());
                    for b in buf.iter_mut().take(n) {
                        *b = wire.incoming.pop_front().unwrap();
                    }
                    return Ok(n);
                }
            }
            thread::sleep(Duration::from_millis(2));
            Err(std::io::Error::new(ErrorKind::TimedOut, "no data"))
        }
    }

    impl Read for FakePort {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.wire.lock().unwrap().written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for FakePort {
        fn name(&self) -> &str {
            "fake"
        }
        fn clear_buffers(&mut self) -> Result<()> {
            Ok(())
        }
        fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>> {
            Ok(Box::new(FakeReader {
                wire: Arc::clone(&self.wire),
            }))
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn fake_link() -> (SerialLink<FakePort>, Arc<Mutex<Wire>>) {
        let wire = Arc::new(Mutex::new(Wire::default()));
        let link = SerialLink::new(FakePort {
            wire: Arc::clone(&wire),
        })
        .unwrap();
        (link, wire)
    }

    #[test]
    fn test_receive_buffer_append_snapshot_reset() {
        let buffer = ReceiveBuffer::new();
        assert!(buffer.is_empty());

        buffer.append(&[1, 2]);
        buffer.clone().append(&[3]);
        assert_eq!(buffer.snapshot(), vec![1, 2, 3]);
        assert_eq!(buffer.len(), 3);

        buffer.reset();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_reader_thread_appends_chunks() {
        let (link, wire) = fake_link();

        wire.lock().unwrap().incoming.extend([0x08, 0x00]);
        assert!(wait_until(|| link.snapshot().len() == 2));

        wire.lock().unwrap().incoming.extend([0x03, 0x35]);
        assert!(wait_until(|| link.snapshot().len() == 4));
        assert_eq!(link.snapshot(), vec![0x08, 0x00, 0x03, 0x35]);
    }

    #[test]
    fn test_send_writes_frame_and_reset_clears() {
        let (mut link, wire) = fake_link();

        link.send(&[0x80, 0x00, 0x03, 0x35, 0x01, 0xB7]).unwrap();
        assert_eq!(
            wire.lock().unwrap().written,
            vec![0x80, 0x00, 0x03, 0x35, 0x01, 0xB7]
        );

        wire.lock().unwrap().incoming.extend([0xAA]);
        assert!(wait_until(|| !link.snapshot().is_empty()));
        link.reset_buffer();
        assert!(link.snapshot().is_empty());
    }

    #[test]
    fn test_read_failure_marks_disconnected() {
        let (mut link, wire) = fake_link();
        assert!(link.is_connected());

        wire.lock().unwrap().broken = true;
        assert!(wait_until(|| !link.is_connected()));
        assert!(matches!(link.send(&[0x00]), Err(Error::Disconnected)));
    }

    struct EofPort;

    impl Read for EofPort {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for EofPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for EofPort {
        fn name(&self) -> &str {
            "eof"
        }
        fn clear_buffers(&mut self) -> Result<()> {
            Ok(())
        }
        fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>> {
            Ok(Box::new(EofPort))
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_end_of_stream_marks_disconnected() {
        let mut link = SerialLink::new(EofPort).unwrap();
        assert!(wait_until(|| !link.is_connected()));
        assert!(wait_until(|| link.reader.as_ref().is_none_or(JoinHandle::is_finished)));
        assert!(matches!(link.send(&[0x00]), Err(Error::Disconnected)));
    }

    #[test]
    fn test_close_stops_reader() {
        let (mut link, _wire) = fake_link();
        link.close().unwrap();
        assert!(!link.is_connected());
        assert!(link.reader.is_none());
    }
}
