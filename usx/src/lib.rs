//! # usx
//!
//! A library for downloading code to phone bootloaders that speak the
//! 0x7E-delimited BootROM/FDL download protocol.
//!
//! This crate provides the core functionality for talking to a device in
//! download mode, including:
//!
//! - Frame encoding/decoding with byte stuffing
//! - BootROM (CRC-16) and FDL (ones-complement) checksums
//! - Request/acknowledge exchanges
//! - Start / data / end transfer sessions
//!
//! ## Supported Transports
//!
//! - **Serial** (default): USB-serial nodes via the `serialport` crate
//! - **USB** (optional): raw bulk endpoints via `rusb`/libusb
//!
//! ## Features
//!
//! - `native` (default): Serial port transport
//! - `usb`: libusb bulk transport
//! - `serde`: Serialization support for configuration types
//!
//! ## Example
//!
//! ```rust
//! use std::io::Cursor;
//! use usx::{ChecksumMode, Downloader, DownloaderConfig, FrameType, MockTransport};
//!
//! fn main() -> usx::Result<()> {
//!     let mut mock = MockTransport::new();
//!     mock.push_acks(ChecksumMode::BootRom, 4)?;
//!
//!     let mut dl = Downloader::new(mock, DownloaderConfig::default());
//!     dl.connect()?;
//!
//!     let image = vec![0u8; 100];
//!     dl.send(&mut Cursor::new(&image), 0x4000_0000, 100, |sent, total| {
//!         println!("{sent}/{total}");
//!     })?;
//!
//!     let sent = dl.transport().sent_frames(ChecksumMode::BootRom)?;
//!     assert_eq!(sent.last().map(|f| f.frame_type()), Some(FrameType::EndDataTransfer));
//!     dl.close()
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod downloader;
pub mod error;
pub mod port;
pub mod protocol;
pub mod trace;
pub mod transfer;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Transfer
/// sessions consult it between data chunks.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
#[cfg(feature = "usb")]
pub use port::UsbPort;
pub use {
    downloader::{DEFAULT_BLOCK_SIZE, Downloader, DownloaderConfig, RECEIVE_BUFFER_SIZE},
    error::{Error, Result},
    port::{MockTransport, SerialConfig, Transport, UsbConfig},
    protocol::{ChecksumMode, Frame, FrameCodec, FrameType},
    transfer::{TransferPhase, TransferSession},
};
