//! Error types for usx.

use std::io;
use thiserror::Error;

use crate::protocol::FrameType;

/// Result type for usx operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for usx operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (transport, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// USB error.
    #[cfg(feature = "usb")]
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// No device matched the requested identifiers.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Transport did not complete within its timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Received buffer is shorter than the smallest possible frame.
    #[error("Frame too short: {len} bytes (minimum {min})")]
    TooShort {
        /// Number of bytes received.
        len: usize,
        /// Minimum frame size.
        min: usize,
    },

    /// Missing or misplaced frame delimiter.
    #[error("Framing error: {0}")]
    Framing(String),

    /// Declared payload size exceeds the bytes available in the buffer.
    #[error("Data underflow: frame declares {declared} payload bytes, {available} available")]
    DataUnderflow {
        /// Payload size from the frame header.
        declared: usize,
        /// Bytes actually available for the payload.
        available: usize,
    },

    /// Frame checksum mismatch.
    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch {
        /// Checksum recomputed over the received frame.
        expected: u16,
        /// Checksum carried on the wire.
        actual: u16,
    },

    /// A frame or transfer buffer could not be allocated.
    #[error("Allocation failure: could not reserve {0} bytes")]
    Allocation(usize),

    /// Payload does not fit the 16-bit size field.
    #[error("Payload too large: {0} bytes (maximum 65535)")]
    PayloadTooLarge(usize),

    /// Device answered with something other than an acknowledgement.
    #[error("Device rejected {request}: responded with {response} ({:#04x})", response.code())]
    Rejected {
        /// Request that was sent.
        request: FrameType,
        /// Response type reported by the device.
        response: FrameType,
    },

    /// Device sent an unsolicited frame of the wrong type.
    #[error("Expected {expected}, device answered with {actual} ({:#04x})", actual.code())]
    UnexpectedResponse {
        /// Frame type that was awaited.
        expected: FrameType,
        /// Frame type that arrived.
        actual: FrameType,
    },

    /// Source image does not fit the 32-bit size field of a transfer.
    #[error("Image too large: {0} bytes (maximum 4294967295)")]
    ImageTooLarge(u64),

    /// Operation invoked in a state that does not allow it.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation stopped at the embedding application's request.
    #[error("Interrupted")]
    Interrupted,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error came from decoding or encoding a frame.
    pub fn is_wire_error(&self) -> bool {
        matches!(
            self,
            Self::TooShort { .. }
                | Self::Framing(_)
                | Self::DataUnderflow { .. }
                | Self::ChecksumMismatch { .. }
                | Self::Allocation(_)
        )
    }

    /// Whether this error reports a device-level outcome rather than a failure
    /// of the link itself.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Rejected { .. } | Self::UnexpectedResponse { .. }
        )
    }
}
