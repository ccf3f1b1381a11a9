//! Transport abstraction for talking to a bootloader.
//!
//! The protocol layer only needs two blocking operations: send a whole buffer,
//! and receive whatever the device answers in one go. This module defines
//! that contract as the [`Transport`] trait and provides implementations:
//!
//! - **Serial** (default `native` feature): USB-serial nodes via `serialport`
//! - **USB** (`usb` feature): raw bulk endpoints via `rusb`/libusb
//! - **Mock**: scripted responses for tests
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------+
//! |  Downloader / TransferSession|
//! +--------------+--------------+
//!                |
//!                v
//! +--------------+--------------+
//! |   FrameCodec (encode/decode) |
//! +--------------+--------------+
//!                |
//!                v
//! +--------------+--------------+
//! |       Transport trait        |
//! +------+-------+-------+------+
//!        |       |       |
//!        v       v       v
//!    NativePort UsbPort MockTransport
//! ```
//!
//! ## Example
//!
//! ```rust
//! use usx::port::{MockTransport, Transport};
//!
//! fn example<T: Transport>(port: &mut T) -> usx::Result<()> {
//!     port.transmit(&[0x7E])?;
//!
//!     let mut buf = [0u8; 64];
//!     let n = port.receive(&mut buf)?;
//!     println!("Received: {:02x?}", &buf[..n]);
//!
//!     Ok(())
//! }
//!
//! let mut mock = MockTransport::new();
//! mock.push_response(vec![0x7E, 0x00, 0x81, 0x00, 0x00, 0x00, 0x00, 0x7E]);
//! example(&mut mock).unwrap();
//! ```

pub mod mock;
#[cfg(feature = "native")]
pub mod native;
#[cfg(feature = "usb")]
pub mod usb;

use std::time::Duration;

use crate::error::Result;

/// Default transport timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// USB bulk-endpoint configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbConfig {
    /// USB vendor ID.
    pub vid: u16,
    /// USB product ID.
    pub pid: u16,
    /// Interface number to claim.
    pub interface: u8,
    /// Bulk IN endpoint address (device to host).
    pub input: u8,
    /// Bulk OUT endpoint address (host to device).
    pub output: u8,
    /// Per-transfer timeout.
    pub timeout: Duration,
}

impl UsbConfig {
    /// Create a configuration for the device with the given IDs.
    pub fn new(vid: u16, pid: u16) -> Self {
        Self {
            vid,
            pid,
            interface: 0,
            input: 0x81,
            output: 0x01,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set interface and endpoints.
    #[must_use]
    pub fn with_endpoints(mut self, interface: u8, input: u8, output: u8) -> Self {
        self.interface = interface;
        self.input = input;
        self.output = output;
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Blocking byte transport to the device.
///
/// One [`receive`](Transport::receive) is expected to yield one complete
/// frame; the codec does no reassembly across calls.
pub trait Transport: Send {
    /// Write the entire buffer or fail.
    fn transmit(&mut self, buf: &[u8]) -> Result<()>;

    /// Block until data arrives or the timeout expires, returning the number
    /// of bytes placed in `buf`.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Human-readable name of the underlying device.
    fn name(&self) -> &str;

    /// Close the transport and release resources.
    ///
    /// After calling this method, the transport cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn transmit(&mut self, buf: &[u8]) -> Result<()> {
        (**self).transmit(buf)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).receive(buf)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

// Re-export the appropriate implementation based on features
pub use mock::MockTransport;
#[cfg(feature = "native")]
pub use native::NativePort;
#[cfg(feature = "usb")]
pub use usb::UsbPort;
