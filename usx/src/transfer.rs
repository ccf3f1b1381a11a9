//! Multi-frame data transfer.
//!
//! Downloading an image is a three-phase conversation, every request of which
//! must be acknowledged:
//!
//! ```text
//! host                                      device
//!  | -- StartDataTransfer(addr, size) -------> |
//!  | <------------------------------ Ack ----- |
//!  | -- DataTransfer(chunk 1) ---------------> |
//!  | <------------------------------ Ack ----- |
//!  |    ...                                    |
//!  | -- DataTransfer(chunk N) ---------------> |
//!  | <------------------------------ Ack ----- |
//!  | -- EndDataTransfer ---------------------> |
//!  | <------------------------------ Ack ----- |
//! ```
//!
//! The session stops at the first failure and sends nothing further.

use std::fmt;
use std::io::Read;

use byteorder::{BigEndian, WriteBytesExt};
use log::{debug, info, warn};

use crate::downloader::Downloader;
use crate::error::{Error, Result};
use crate::port::Transport;
use crate::protocol::{Frame, FrameType, MAX_DATA_SIZE};

/// Where a [`TransferSession`] currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// StartDataTransfer not yet acknowledged.
    Start,
    /// Sending data chunks.
    Transfer,
    /// EndDataTransfer not yet acknowledged.
    End,
    /// Finished successfully.
    Done,
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Transfer => "transfer",
            Self::End => "end",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// One download of `total` bytes to `address`.
pub struct TransferSession<'a, T: Transport> {
    downloader: &'a mut Downloader<T>,
    address: u32,
    total: u32,
    remaining: u32,
    phase: TransferPhase,
    interrupted: Box<dyn Fn() -> bool + 'a>,
}

impl<'a, T: Transport> TransferSession<'a, T> {
    /// Create a session on `downloader`. Nothing is sent until
    /// [`run`](Self::run).
    pub fn new(downloader: &'a mut Downloader<T>, address: u32, total: u32) -> Self {
        Self {
            downloader,
            address,
            total,
            remaining: total,
            phase: TransferPhase::Start,
            interrupted: Box::new(crate::is_interrupted_requested),
        }
    }

    /// Replace the interruption check consulted between chunks.
    ///
    /// Defaults to the process-wide checker registered with
    /// [`set_interrupt_checker`](crate::set_interrupt_checker).
    #[must_use]
    pub fn with_interrupt_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn() -> bool + 'a,
    {
        self.interrupted = Box::new(checker);
        self
    }

    /// Current phase. After a failed [`run`](Self::run) this is the phase
    /// the failure happened in.
    pub fn phase(&self) -> TransferPhase {
        self.phase
    }

    /// Bytes not yet acknowledged.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Destination address.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Total transfer size.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Largest payload carried by one DataTransfer frame.
    fn chunk_size(&self) -> Result<usize> {
        let block_size = self
            .downloader
            .block_size();
        match block_size.checked_mul(2) {
            Some(size) if size > 0 && size <= MAX_DATA_SIZE => Ok(size),
            _ => Err(Error::Config(format!(
                "block size {block_size} gives a chunk outside 1..={MAX_DATA_SIZE} bytes"
            ))),
        }
    }

    /// Run all phases, reading the image from `source`.
    ///
    /// `progress` receives `(sent, total)` after every acknowledged chunk.
    pub fn run<R, F>(&mut self, source: &mut R, mut progress: F) -> Result<()>
    where
        R: Read,
        F: FnMut(u32, u32),
    {
        if self.phase != TransferPhase::Start {
            return Err(Error::Protocol(format!(
                "transfer session already in {} phase",
                self.phase
            )));
        }

        let chunk_size = self.chunk_size()?;
        let result = self
            .start()
            .and_then(|()| self.transfer(source, chunk_size, &mut progress))
            .and_then(|()| self.end());

        if let Err(ref e) = result {
            warn!("Transfer aborted in {} phase: {e}", self.phase);
        }
        result
    }

    fn start(&mut self) -> Result<()> {
        info!(
            "Starting transfer of {} bytes to {:#010x}",
            self.total, self.address
        );

        let mut payload = Vec::with_capacity(8);
        payload.write_u32::<BigEndian>(self.address)?;
        payload.write_u32::<BigEndian>(self.total)?;

        self.downloader
            .expect_ack(&Frame::with_data(FrameType::StartDataTransfer, payload)?)?;
        self.phase = TransferPhase::Transfer;
        Ok(())
    }

    fn transfer<R, F>(&mut self, source: &mut R, chunk_size: usize, progress: &mut F) -> Result<()>
    where
        R: Read,
        F: FnMut(u32, u32),
    {
        let mut chunk = Vec::new();
        chunk
            .try_reserve_exact(chunk_size)
            .map_err(|_| Error::Allocation(chunk_size))?;

        while self.remaining > 0 {
            if (self.interrupted)() {
                return Err(Error::Interrupted);
            }

            let len = usize::try_from(self.remaining).map_or(chunk_size, |r| r.min(chunk_size));
            chunk.resize(len, 0);
            source.read_exact(&mut chunk)?;

            let frame = Frame::with_data(FrameType::DataTransfer, chunk)?;
            self.downloader
                .expect_ack(&frame)?;
            chunk = frame.into_data();

            // `len` is at most `remaining`, so this fits.
            self.remaining -= u32::try_from(len).unwrap_or(self.remaining);
            let sent = self.total - self.remaining;
            debug!("Sent {sent}/{} bytes", self.total);
            progress(sent, self.total);
        }

        self.phase = TransferPhase::End;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.downloader
            .expect_ack(&Frame::new(FrameType::EndDataTransfer))?;
        self.phase = TransferPhase::Done;
        info!("Transfer complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::io::{Cursor, ErrorKind};

    use super::*;
    use crate::downloader::DownloaderConfig;
    use crate::port::MockTransport;
    use crate::protocol::ChecksumMode;

    const MODE: ChecksumMode = ChecksumMode::BootRom;

    fn downloader(block_size: usize) -> Downloader<MockTransport> {
        Downloader::new(
            MockTransport::new(),
            DownloaderConfig::default().with_block_size(block_size),
        )
    }

    fn image(len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| (i % 251) as u8)
            .collect()
    }

    #[test]
    fn test_full_transfer_frames() {
        let mut dl = downloader(512);
        // Start + 3 chunks (1024, 1024, 452) + End
        dl.transport_mut()
            .push_acks(MODE, 5)
            .unwrap();

        let data = image(2500);
        let mut calls = Vec::new();
        let mut session = TransferSession::new(&mut dl, 0x8000_0000, 2500);
        session
            .run(&mut Cursor::new(&data), |sent, total| calls.push((sent, total)))
            .unwrap();
        assert_eq!(session.phase(), TransferPhase::Done);
        assert_eq!(session.remaining(), 0);
        drop(session);

        assert_eq!(calls, vec![(1024, 2500), (2048, 2500), (2500, 2500)]);

        let frames = dl
            .transport()
            .sent_frames(MODE)
            .unwrap();
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[0].frame_type(), FrameType::StartDataTransfer);
        assert_eq!(
            frames[0].data(),
            &[0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x09, 0xC4]
        );
        assert_eq!(frames[1].data(), &data[..1024]);
        assert_eq!(frames[2].data(), &data[1024..2048]);
        assert_eq!(frames[3].data(), &data[2048..]);
        assert_eq!(frames[4], Frame::new(FrameType::EndDataTransfer));
    }

    #[test]
    fn test_start_payload_vector() {
        let mut dl = downloader(512);
        // Start, four 1024-byte chunks, End.
        dl.transport_mut()
            .push_acks(MODE, 6)
            .unwrap();

        let data = image(0x1000);
        dl.send(&mut Cursor::new(&data), 0x8000_0000, 0x1000, |_, _| {})
            .unwrap();

        // Start frame for 0x80000000 / 0x1000 carries checksum 0x0f44.
        assert_eq!(
            dl.transport()
                .sent()[0],
            vec![
                0x7E, 0x00, 0x01, 0x00, 0x08, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00,
                0x0F, 0x44, 0x7E
            ]
        );
        assert_eq!(
            dl.transport()
                .sent()
                .len(),
            6
        );
        assert_eq!(
            dl.transport()
                .pending(),
            0
        );
    }

    #[test]
    fn test_abort_on_second_chunk() {
        let mut dl = downloader(512);
        dl.transport_mut()
            .push_acks(MODE, 2)
            .unwrap();
        dl.transport_mut()
            .push_reply(MODE, FrameType::VerificationError)
            .unwrap();

        let data = image(3000);
        let mut session = TransferSession::new(&mut dl, 0, 3000);
        let err = session
            .run(&mut Cursor::new(&data), |_, _| {})
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Rejected {
                request: FrameType::DataTransfer,
                response: FrameType::VerificationError,
            }
        ));
        assert_eq!(session.phase(), TransferPhase::Transfer);
        assert_eq!(session.remaining(), 3000 - 1024);
        drop(session);

        let types: Vec<FrameType> = dl
            .transport()
            .sent_frames(MODE)
            .unwrap()
            .iter()
            .map(Frame::frame_type)
            .collect();
        assert_eq!(
            types,
            vec![
                FrameType::StartDataTransfer,
                FrameType::DataTransfer,
                FrameType::DataTransfer
            ]
        );
    }

    #[test]
    fn test_start_rejected_sends_nothing_else() {
        let mut dl = downloader(512);
        dl.transport_mut()
            .push_reply(MODE, FrameType::DestinationError)
            .unwrap();

        let err = dl
            .send(&mut Cursor::new(image(10)), 0, 10, |_, _| {})
            .unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(
            dl.transport()
                .sent()
                .len(),
            1
        );
    }

    #[test]
    fn test_short_source_is_unexpected_eof() {
        let mut dl = downloader(512);
        dl.transport_mut()
            .push_acks(MODE, 2)
            .unwrap();

        let data = image(1500);
        let err = dl
            .send(&mut Cursor::new(&data), 0, 2000, |_, _| {})
            .unwrap_err();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other}"),
        }
        // Start and the first full chunk only.
        assert_eq!(
            dl.transport()
                .sent()
                .len(),
            2
        );
    }

    #[test]
    fn test_empty_image() {
        let mut dl = downloader(512);
        dl.transport_mut()
            .push_acks(MODE, 2)
            .unwrap();

        let mut called = false;
        dl.send(&mut std::io::empty(), 0x1000, 0, |_, _| called = true)
            .unwrap();
        assert!(!called);

        let types: Vec<FrameType> = dl
            .transport()
            .sent_frames(MODE)
            .unwrap()
            .iter()
            .map(Frame::frame_type)
            .collect();
        assert_eq!(
            types,
            vec![FrameType::StartDataTransfer, FrameType::EndDataTransfer]
        );
    }

    #[test]
    fn test_interrupted_between_chunks() {
        let mut dl = downloader(16);
        dl.transport_mut()
            .push_acks(MODE, 10)
            .unwrap();

        let chunks = Cell::new(0);
        let data = image(100);
        let mut session = TransferSession::new(&mut dl, 0, 100)
            .with_interrupt_checker(|| chunks.get() >= 2);
        let err = session
            .run(&mut Cursor::new(&data), |_, _| chunks.set(chunks.get() + 1))
            .unwrap_err();

        assert!(matches!(err, Error::Interrupted));
        assert_eq!(session.remaining(), 100 - 64);
        drop(session);
        // Start + two chunks, no End.
        assert_eq!(
            dl.transport()
                .sent()
                .len(),
            3
        );
    }

    #[test]
    fn test_session_cannot_rerun() {
        let mut dl = downloader(512);
        dl.transport_mut()
            .push_acks(MODE, 2)
            .unwrap();

        let mut session = TransferSession::new(&mut dl, 0, 0);
        session
            .run(&mut std::io::empty(), |_, _| {})
            .unwrap();
        assert!(matches!(
            session.run(&mut std::io::empty(), |_, _| {}),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_invalid_block_size() {
        for block_size in [0, 40_000] {
            let mut dl = downloader(block_size);
            let err = dl
                .send(&mut Cursor::new(image(10)), 0, 10, |_, _| {})
                .unwrap_err();
            assert!(matches!(err, Error::Config(_)));
            assert!(
                dl.transport()
                    .sent()
                    .is_empty()
            );
        }
    }
}
