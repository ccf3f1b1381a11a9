//! Downloader context: one open transport plus the framing state bound to it.
//!
//! A [`Downloader`] owns its transport, the [`FrameCodec`] (and thereby the
//! active checksum mode), the receive buffer and the verbose flag. Creating
//! one is "opening" the device; [`Downloader::close`] consumes it, so nothing
//! can be sent on a closed link.
//!
//! ## Example
//!
//! ```rust,no_run
//! use usx::{ChecksumMode, Downloader, DownloaderConfig, SerialConfig};
//! use usx::port::NativePort;
//!
//! fn main() -> usx::Result<()> {
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 115200))?;
//!     let mut dl = Downloader::new(port, DownloaderConfig::default());
//!
//!     let banner = dl.greet()?;
//!     println!("Device says: {banner}");
//!     dl.connect()?;
//!     dl.send_file("fdl1.bin", 0x4000_0000, |sent, total| {
//!         println!("{sent}/{total}");
//!     })?;
//!     dl.execute()?;
//!
//!     // The FDL speaks the other checksum.
//!     dl.set_checksum_mode(ChecksumMode::Fdl);
//!     dl.greet()?;
//!
//!     dl.close()
//! }
//! ```

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::port::Transport;
use crate::protocol::{ChecksumMode, FRAME_DELIMITER, Frame, FrameCodec, FrameType};
use crate::trace;
use crate::transfer::TransferSession;

/// Size of the buffer a single response is received into.
pub const RECEIVE_BUFFER_SIZE: usize = 8192;

/// Default transfer block size. Each data chunk carries twice this many bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Protocol-level settings for a [`Downloader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloaderConfig {
    /// Checksum used for every encoded and decoded frame.
    pub checksum_mode: ChecksumMode,
    /// Transfer block size.
    pub block_size: usize,
    /// Log every frame and raw buffer under the `usx::wire` target.
    pub verbose: bool,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            checksum_mode: ChecksumMode::BootRom,
            block_size: DEFAULT_BLOCK_SIZE,
            verbose: false,
        }
    }
}

impl DownloaderConfig {
    /// Set the checksum mode.
    #[must_use]
    pub fn with_checksum_mode(mut self, mode: ChecksumMode) -> Self {
        self.checksum_mode = mode;
        self
    }

    /// Set the transfer block size.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Enable or disable wire tracing.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// An open link to a bootloader.
///
/// Generic over the transport so the same code drives serial, USB and mock
/// devices.
pub struct Downloader<T: Transport> {
    transport: T,
    codec: FrameCodec,
    block_size: usize,
    verbose: bool,
    rx_buf: Vec<u8>,
}

impl<T: Transport> Downloader<T> {
    /// Wrap an already opened transport.
    pub fn new(transport: T, config: DownloaderConfig) -> Self {
        debug!(
            "Opened {} ({} framing, block size {})",
            transport.name(),
            config.checksum_mode,
            config.block_size
        );
        Self {
            transport,
            codec: FrameCodec::new(config.checksum_mode),
            block_size: config.block_size,
            verbose: config.verbose,
            rx_buf: vec![0u8; RECEIVE_BUFFER_SIZE],
        }
    }

    /// Current configuration.
    pub fn config(&self) -> DownloaderConfig {
        DownloaderConfig {
            checksum_mode: self
                .codec
                .mode(),
            block_size: self.block_size,
            verbose: self.verbose,
        }
    }

    /// Active checksum mode.
    pub fn checksum_mode(&self) -> ChecksumMode {
        self.codec
            .mode()
    }

    /// Switch the checksum mode. Takes effect on the next frame.
    pub fn set_checksum_mode(&mut self, mode: ChecksumMode) {
        info!("Framing set to {mode}");
        self.codec
            .set_mode(mode);
    }

    /// Transfer block size.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Whether wire tracing is on.
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Turn wire tracing on or off.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Get a reference to the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the downloader and return the transport without closing it.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Close the transport.
    pub fn close(self) -> Result<()> {
        let mut transport = self.transport;
        debug!("Closing {}", transport.name());
        transport.close()
    }

    fn transmit(&mut self, bytes: &[u8]) -> Result<()> {
        if self.verbose {
            trace::log_buffer("TX", bytes);
        }
        self.transport
            .transmit(bytes)
    }

    fn receive_frame(&mut self) -> Result<Frame> {
        let n = self
            .transport
            .receive(&mut self.rx_buf)?;
        let received = &self.rx_buf[..n];
        if self.verbose {
            trace::log_buffer("RX", received);
        }

        let frame = self
            .codec
            .decode(received)?;
        if self.verbose {
            trace::log_frame(&frame, self.codec.mode());
        }
        Ok(frame)
    }

    /// Send one request and return the device's single response frame.
    ///
    /// Whatever the device answers is returned as-is; error frames such as
    /// [`FrameType::SizeError`] are not turned into errors here.
    pub fn exchange(&mut self, request: &Frame) -> Result<Frame> {
        let bytes = self
            .codec
            .encode(request)?;
        self.transmit(&bytes)?;
        if self.verbose {
            trace::log_frame(request, self.codec.mode());
        }

        let response = self.receive_frame()?;
        debug!(
            "{} ({} bytes) -> {}",
            request.frame_type(),
            request.data().len(),
            response.frame_type()
        );
        Ok(response)
    }

    /// Exchange `request` and require an acknowledgement.
    pub fn expect_ack(&mut self, request: &Frame) -> Result<()> {
        let response = self.exchange(request)?;
        if response
            .frame_type()
            .is_ack()
        {
            Ok(())
        } else {
            Err(Error::Rejected {
                request: request.frame_type(),
                response: response.frame_type(),
            })
        }
    }

    /// Wake the bootloader and return its banner text.
    ///
    /// Sends a lone delimiter byte, which makes the ROM answer with a
    /// [`FrameType::Banner`] frame carrying its version string.
    pub fn greet(&mut self) -> Result<String> {
        self.transmit(&[FRAME_DELIMITER])?;
        let response = self.receive_frame()?;

        if response.frame_type() != FrameType::Banner {
            return Err(Error::UnexpectedResponse {
                expected: FrameType::Banner,
                actual: response.frame_type(),
            });
        }

        let banner = String::from_utf8_lossy(response.data()).into_owned();
        info!("Device banner: {banner}");
        Ok(banner)
    }

    /// Send a Connect request.
    pub fn connect(&mut self) -> Result<()> {
        self.expect_ack(&Frame::new(FrameType::Connect))?;
        info!("Connected");
        Ok(())
    }

    /// Ask the device to reset.
    pub fn reset(&mut self) -> Result<()> {
        self.expect_ack(&Frame::new(FrameType::Reset))?;
        info!("Reset acknowledged");
        Ok(())
    }

    /// Jump to the most recently downloaded image.
    pub fn execute(&mut self) -> Result<()> {
        self.expect_ack(&Frame::new(FrameType::ExecuteData))?;
        info!("Execute acknowledged");
        Ok(())
    }

    /// Download `size` bytes from `source` to `address`.
    ///
    /// `progress` is called with `(sent, total)` after every acknowledged
    /// chunk.
    pub fn send<R, F>(&mut self, source: &mut R, address: u32, size: u32, progress: F) -> Result<()>
    where
        R: Read,
        F: FnMut(u32, u32),
    {
        TransferSession::new(self, address, size).run(source, progress)
    }

    /// Download a file to `address`.
    pub fn send_file<P, F>(&mut self, path: P, address: u32, progress: F) -> Result<()>
    where
        P: AsRef<Path>,
        F: FnMut(u32, u32),
    {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file
            .metadata()?
            .len();
        let size = u32::try_from(len).map_err(|_| Error::ImageTooLarge(len))?;

        info!("Sending {} ({size} bytes) to {address:#010x}", path.display());
        let mut reader = BufReader::new(file);
        self.send(&mut reader, address, size, progress)
    }
}
