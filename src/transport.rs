use embassy_time::{Duration, Instant, Timer};

use crate::error::{PcapError, PcapResult, TransportError};

/// How often an idle transport is polled.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A byte stream to the host, usually a USB CDC ACM port or a UART.
///
/// None of these may block. Changes of the DTR and RTS lines are reported separately,
/// through [CaptureSession::notify_dtr_rts](crate::CaptureSession::notify_dtr_rts).
pub trait Transport {
    /// The amount of bytes, which can be read without waiting.
    fn available(&self) -> usize;
    /// Read one byte, if there is one.
    fn read_byte(&mut self) -> Option<u8>;
    /// Write as much of `buf` as currently fits, returning how much that was.
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;
    /// Push out buffered data.
    fn flush(&mut self) -> Result<(), TransportError>;
    /// Returns `true`, if a host is attached.
    fn is_connected(&self) -> bool;
    /// Tear down and set up the transport again.
    ///
    /// This is called before synchronizing, after a write to the host failed.
    fn reinitialize(&mut self) {}
}

/// Discard everything in the receive buffer, returning how many bytes that were.
pub(crate) fn discard_input(transport: &mut impl Transport) -> usize {
    let mut discarded = 0;
    while transport.available() > 0 {
        if transport.read_byte().is_none() {
            break;
        }
        discarded += 1;
    }
    discarded
}

/// Wait up to `timeout` for a byte from the host.
pub(crate) async fn read_byte_timeout(
    transport: &mut impl Transport,
    timeout: Duration,
) -> Option<u8> {
    let deadline = Instant::now() + timeout;
    loop {
        if transport.available() > 0 {
            if let Some(byte) = transport.read_byte() {
                return Some(byte);
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        Timer::after(POLL_INTERVAL).await;
    }
}

/// Write all of `buf`, retrying partial writes.
///
/// If the transport doesn't accept anything for `stall_timeout`, or the host disconnects
/// while we're waiting, the write is considered hung.
pub(crate) async fn write_all(
    transport: &mut impl Transport,
    buf: &[u8],
    stall_timeout: Duration,
) -> PcapResult<()> {
    let mut remaining = buf;
    let mut last_progress = Instant::now();
    while !remaining.is_empty() {
        match transport.write(remaining) {
            Ok(0) => {
                if !transport.is_connected() || last_progress.elapsed() >= stall_timeout {
                    debug!("Write stalled with {} bytes left.", remaining.len());
                    return Err(PcapError::WriteStalled);
                }
                Timer::after(POLL_INTERVAL).await;
            }
            Ok(written) => {
                remaining = &remaining[written.min(remaining.len())..];
                last_progress = Instant::now();
            }
            Err(err) => {
                debug!("Transport write failed: {:?}", err);
                return Err(PcapError::WriteFailed);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::handshake::BANNER;
    use embassy_futures::block_on;
    use std::{collections::VecDeque, vec::Vec};

    /// An in memory transport.
    ///
    /// At most `chunk` bytes are accepted per write, and after `fail_after` bytes writes
    /// fail. Flushing fails, if `fail_flush` is set. Every time the banner is written, the next reply becomes readable.
    pub(crate) struct MockTransport {
        pub input: VecDeque<u8>,
        pub replies: VecDeque<Vec<u8>>,
        pub output: Vec<u8>,
        pub connected: bool,
        pub chunk: usize,
        pub fail_after: Option<usize>,
        pub fail_flush: bool,
        pub reinitialized: usize,
    }
    impl MockTransport {
        pub fn new() -> Self {
            Self {
                input: VecDeque::new(),
                replies: VecDeque::new(),
                output: Vec::new(),
                connected: true,
                chunk: usize::MAX,
                fail_after: None,
                fail_flush: false,
                reinitialized: 0,
            }
        }
        pub fn with_input(input: &[u8]) -> Self {
            let mut transport = Self::new();
            transport.input.extend(input);
            transport
        }
        pub fn replying(replies: &[&[u8]]) -> Self {
            let mut transport = Self::new();
            transport.replies.extend(replies.iter().map(|reply| reply.to_vec()));
            transport
        }
        /// The output as text, up to the first byte that isn't valid UTF-8.
        pub fn text(&self) -> &str {
            match std::str::from_utf8(&self.output) {
                Ok(text) => text,
                Err(err) => std::str::from_utf8(&self.output[..err.valid_up_to()]).unwrap(),
            }
        }
    }
    impl Transport for MockTransport {
        fn available(&self) -> usize {
            self.input.len()
        }
        fn read_byte(&mut self) -> Option<u8> {
            self.input.pop_front()
        }
        fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
            if !self.connected {
                return Err(TransportError::Disconnected);
            }
            let mut len = buf.len().min(self.chunk);
            if let Some(fail_after) = self.fail_after {
                let left = fail_after.saturating_sub(self.output.len());
                if left == 0 {
                    return Err(TransportError::Io);
                }
                len = len.min(left);
            }
            self.output.extend_from_slice(&buf[..len]);
            if buf[..len].starts_with(BANNER.as_bytes()) {
                if let Some(reply) = self.replies.pop_front() {
                    self.input.extend(reply);
                }
            }
            Ok(len)
        }
        fn flush(&mut self) -> Result<(), TransportError> {
            if self.fail_flush {
                return Err(TransportError::Io);
            }
            Ok(())
        }
        fn is_connected(&self) -> bool {
            self.connected
        }
        fn reinitialize(&mut self) {
            self.reinitialized += 1;
        }
    }

    /// Accepts nothing, but stays connected.
    struct Stuck;
    impl Transport for Stuck {
        fn available(&self) -> usize {
            0
        }
        fn read_byte(&mut self) -> Option<u8> {
            None
        }
        fn write(&mut self, _buf: &[u8]) -> Result<usize, TransportError> {
            Ok(0)
        }
        fn flush(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
    }

    #[test]
    fn partial_writes_are_retried() {
        let mut transport = MockTransport::new();
        transport.chunk = 3;
        let data: Vec<u8> = (0..50).collect();
        block_on(write_all(&mut transport, &data, Duration::from_millis(100))).unwrap();
        assert_eq!(transport.output, data);
    }

    #[test]
    fn failing_writes() {
        let mut transport = MockTransport::new();
        transport.fail_after = Some(10);
        assert_eq!(
            block_on(write_all(&mut transport, &[0; 20], Duration::from_millis(100))),
            Err(PcapError::WriteFailed)
        );
        assert_eq!(transport.output.len(), 10);

        let started = Instant::now();
        assert_eq!(
            block_on(write_all(&mut Stuck, &[0; 20], Duration::from_millis(20))),
            Err(PcapError::WriteStalled)
        );
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn reading_with_timeout() {
        let mut transport = MockTransport::with_input(b"ab");
        assert_eq!(discard_input(&mut transport), 2);
        assert_eq!(
            block_on(read_byte_timeout(&mut transport, Duration::from_millis(5))),
            None
        );
        transport.input.push_back(b'C');
        assert_eq!(
            block_on(read_byte_timeout(&mut transport, Duration::from_millis(5))),
            Some(b'C')
        );
    }
}
