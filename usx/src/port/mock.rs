//! Scripted in-memory transport.
//!
//! Responses are queued up front and handed out one per
//! [`receive`](Transport::receive) call. Everything transmitted is recorded so
//! tests can assert on the exact request sequence.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::port::{DEFAULT_TIMEOUT, Transport};
use crate::protocol::{ChecksumMode, Frame, FrameCodec, FrameType};

#[derive(Debug)]
enum Reply {
    Bytes(Vec<u8>),
    Timeout,
}

/// Transport that replays queued responses.
#[derive(Debug)]
pub struct MockTransport {
    replies: VecDeque<Reply>,
    sent: Vec<Vec<u8>>,
    fail_transmit: bool,
    timeout: Duration,
    closed: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a transport with no queued responses.
    pub fn new() -> Self {
        Self {
            replies: VecDeque::new(),
            sent: Vec::new(),
            fail_transmit: false,
            timeout: DEFAULT_TIMEOUT,
            closed: false,
        }
    }

    /// Queue raw bytes for the next receive.
    pub fn push_response(&mut self, bytes: Vec<u8>) {
        self.replies.push_back(Reply::Bytes(bytes));
    }

    /// Queue an encoded frame for the next receive.
    pub fn push_frame(&mut self, mode: ChecksumMode, frame: &Frame) -> Result<()> {
        let bytes = FrameCodec::new(mode).encode(frame)?;
        self.push_response(bytes);
        Ok(())
    }

    /// Queue an empty-payload frame of type `frame_type`.
    pub fn push_reply(&mut self, mode: ChecksumMode, frame_type: FrameType) -> Result<()> {
        self.push_frame(mode, &Frame::new(frame_type))
    }

    /// Queue `count` acknowledgements.
    pub fn push_acks(&mut self, mode: ChecksumMode, count: usize) -> Result<()> {
        for _ in 0..count {
            self.push_reply(mode, FrameType::Acknowledgement)?;
        }
        Ok(())
    }

    /// Make the next receive time out.
    pub fn push_timeout(&mut self) {
        self.replies.push_back(Reply::Timeout);
    }

    /// Make every transmit fail with a broken-pipe I/O error.
    pub fn fail_transmit(&mut self, fail: bool) {
        self.fail_transmit = fail;
    }

    /// Buffers transmitted so far, in order.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Decode every transmitted buffer under `mode`.
    pub fn sent_frames(&self, mode: ChecksumMode) -> Result<Vec<Frame>> {
        let codec = FrameCodec::new(mode);
        self.sent
            .iter()
            .map(|buf| codec.decode(buf))
            .collect()
    }

    /// Number of responses not yet consumed.
    pub fn pending(&self) -> usize {
        self.replies.len()
    }

    /// Whether [`close`](Transport::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transport closed",
            )))
        } else {
            Ok(())
        }
    }
}

impl Transport for MockTransport {
    fn transmit(&mut self, buf: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if self.fail_transmit {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock transmit failure",
            )));
        }
        self.sent.push(buf.to_vec());
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        match self.replies.pop_front() {
            Some(Reply::Bytes(bytes)) => {
                // Like a real short read, anything past capacity is lost.
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            },
            Some(Reply::Timeout) | None => Err(Error::Timeout(format!(
                "no response within {} ms",
                self.timeout.as_millis()
            ))),
        }
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
