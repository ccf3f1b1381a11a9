//! Frame model and the byte-stuffed wire codec.
//!
//! ## Frame Format
//!
//! ```text
//! +------+-----------+---------------+-----------+----------+------+
//! | 0x7E | Type (BE) | DataSize (BE) |   Data    | Checksum | 0x7E |
//! +------+-----------+---------------+-----------+----------+------+
//! | 1    | 2         | 2             | DataSize  | 2 (BE)   | 1    |
//! +------+-----------+---------------+-----------+----------+------+
//! ```
//!
//! Every byte between the two delimiters that equals `0x7D` or `0x7E` is sent
//! as `0x7D, byte ^ 0x20`. The delimiters themselves are never escaped.

use std::fmt;

use log::trace;

use crate::error::{Error, Result};
use crate::protocol::checksum::ChecksumMode;

/// Frame start/end delimiter.
pub const FRAME_DELIMITER: u8 = 0x7E;

/// Escape introducer.
pub const ESCAPE: u8 = 0x7D;

/// XOR mask applied to an escaped byte.
pub const ESCAPE_MASK: u8 = 0x20;

/// Smallest possible frame: two delimiters, type, size and checksum.
pub const MIN_FRAME_SIZE: usize = 8;

/// Largest payload the 16-bit size field can describe.
pub const MAX_DATA_SIZE: usize = u16::MAX as usize;

/// Frame type codes.
///
/// Codes outside the known set are carried as [`FrameType::Unknown`] and
/// round-trip unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Open a session with the loader (0x00).
    Connect,
    /// Announce destination address and size of a download (0x01).
    StartDataTransfer,
    /// One chunk of download payload (0x02).
    DataTransfer,
    /// Close the current download (0x03).
    EndDataTransfer,
    /// Jump to the downloaded code (0x04).
    ExecuteData,
    /// Reset the device (0x05).
    Reset,
    /// Read flash contents (0x06).
    ReadFlash,
    /// Erase a flash region (0x0A).
    EraseFlash,
    /// Query the flash type (0x0C).
    ReadFlashType,
    /// Query flash geometry (0x0D).
    ReadFlashInfo,
    /// Enable flash access (0x1B).
    EnableFlash,
    /// The request was accepted (0x80).
    Acknowledgement,
    /// Loader version banner (0x81).
    Banner,
    /// Destination address rejected (0x89).
    DestinationError,
    /// Size rejected (0x8A).
    SizeError,
    /// Verification error (0x8B).
    VerificationError,
    /// Flash read data (0x93).
    ReadFlashResponse,
    /// Verification failure (0xA6).
    VerificationFailure,
    /// Any other code.
    Unknown(u16),
}

impl FrameType {
    /// Wire code for this type.
    pub fn code(self) -> u16 {
        match self {
            Self::Connect => 0x00,
            Self::StartDataTransfer => 0x01,
            Self::DataTransfer => 0x02,
            Self::EndDataTransfer => 0x03,
            Self::ExecuteData => 0x04,
            Self::Reset => 0x05,
            Self::ReadFlash => 0x06,
            Self::EraseFlash => 0x0A,
            Self::ReadFlashType => 0x0C,
            Self::ReadFlashInfo => 0x0D,
            Self::EnableFlash => 0x1B,
            Self::Acknowledgement => 0x80,
            Self::Banner => 0x81,
            Self::DestinationError => 0x89,
            Self::SizeError => 0x8A,
            Self::VerificationError => 0x8B,
            Self::ReadFlashResponse => 0x93,
            Self::VerificationFailure => 0xA6,
            Self::Unknown(code) => code,
        }
    }

    /// Human-readable label, `None` for unknown codes.
    pub fn label(self) -> Option<&'static str> {
        let label = match self {
            Self::Connect => "Connect",
            Self::StartDataTransfer => "Start Data Transfer",
            Self::DataTransfer => "Data Transfer",
            Self::EndDataTransfer => "End Data Transfer",
            Self::ExecuteData => "Execute Data",
            Self::Reset => "Reset",
            Self::ReadFlash => "Read Flash",
            Self::EraseFlash => "Erase Flash",
            Self::ReadFlashType => "Read Flash Type",
            Self::ReadFlashInfo => "Read Flash Info",
            Self::EnableFlash => "Enable Flash",
            Self::Acknowledgement => "Acknowledgement",
            Self::Banner => "Banner",
            Self::DestinationError => "Destination Error",
            Self::SizeError => "Size Error",
            Self::VerificationError => "Verification Error",
            Self::ReadFlashResponse => "Read Flash Response",
            Self::VerificationFailure => "Verification Failure",
            Self::Unknown(_) => return None,
        };
        Some(label)
    }

    /// Whether the device reported success.
    pub fn is_ack(self) -> bool {
        self == Self::Acknowledgement
    }
}

impl From<u16> for FrameType {
    fn from(code: u16) -> Self {
        match code {
            0x00 => Self::Connect,
            0x01 => Self::StartDataTransfer,
            0x02 => Self::DataTransfer,
            0x03 => Self::EndDataTransfer,
            0x04 => Self::ExecuteData,
            0x05 => Self::Reset,
            0x06 => Self::ReadFlash,
            0x0A => Self::EraseFlash,
            0x0C => Self::ReadFlashType,
            0x0D => Self::ReadFlashInfo,
            0x1B => Self::EnableFlash,
            0x80 => Self::Acknowledgement,
            0x81 => Self::Banner,
            0x89 => Self::DestinationError,
            0x8A => Self::SizeError,
            0x8B => Self::VerificationError,
            0x93 => Self::ReadFlashResponse,
            0xA6 => Self::VerificationFailure,
            other => Self::Unknown(other),
        }
    }
}

impl From<FrameType> for u16 {
    fn from(frame_type: FrameType) -> Self {
        frame_type.code()
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label().unwrap_or("Unknown"))
    }
}

/// A protocol message.
///
/// The size field is always derived from the payload, so it cannot disagree
/// with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    frame_type: FrameType,
    data: Vec<u8>,
}

impl Frame {
    /// Create a frame with an empty payload.
    pub fn new(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            data: Vec::new(),
        }
    }

    /// Create a frame carrying `data`.
    pub fn with_data(frame_type: FrameType, data: Vec<u8>) -> Result<Self> {
        if data.len() > MAX_DATA_SIZE {
            return Err(Error::PayloadTooLarge(data.len()));
        }
        Ok(Self { frame_type, data })
    }

    /// Frame type.
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the frame and return its payload.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Value of the size field.
    #[allow(clippy::cast_possible_truncation)]
    pub fn data_size(&self) -> u16 {
        // Bounded by MAX_DATA_SIZE at construction.
        self.data.len() as u16
    }

    /// Checksum this frame carries on the wire under `mode`.
    pub fn checksum(&self, mode: ChecksumMode) -> u16 {
        mode.frame_checksum(self.frame_type.code(), &self.data)
    }
}

/// Appends escaped bytes to an output buffer.
struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    fn with_capacity(capacity: usize) -> Result<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| Error::Allocation(capacity))?;
        Ok(Self { buf })
    }

    fn raw(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    fn byte(&mut self, byte: u8) {
        if byte == ESCAPE || byte == FRAME_DELIMITER {
            self.buf.push(ESCAPE);
            self.buf.push(byte ^ ESCAPE_MASK);
        } else {
            self.buf.push(byte);
        }
    }

    fn u16(&mut self, value: u16) {
        for byte in value.to_be_bytes() {
            self.byte(byte);
        }
    }

    fn bytes(&mut self, data: &[u8]) {
        for &byte in data {
            self.byte(byte);
        }
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked cursor that undoes byte stuffing.
struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn raw(&mut self) -> Option<u8> {
        let byte = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    fn byte(&mut self) -> Option<u8> {
        match self.raw()? {
            ESCAPE => self.raw().map(|b| b ^ ESCAPE_MASK),
            byte => Some(byte),
        }
    }

    fn u16(&mut self) -> Option<u16> {
        let hi = self.byte()?;
        let lo = self.byte()?;
        Some(u16::from_be_bytes([hi, lo]))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// Encodes and decodes frames under one checksum mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCodec {
    mode: ChecksumMode,
}

impl FrameCodec {
    /// Create a codec for `mode`.
    pub fn new(mode: ChecksumMode) -> Self {
        Self { mode }
    }

    /// Active checksum mode.
    pub fn mode(&self) -> ChecksumMode {
        self.mode
    }

    /// Switch checksum mode; applies to the next encode/decode.
    pub fn set_mode(&mut self, mode: ChecksumMode) {
        self.mode = mode;
    }

    /// Serialize `frame` into a delimited, byte-stuffed buffer.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        // Every byte may need escaping.
        let capacity = (MIN_FRAME_SIZE + frame.data.len()) * 2;
        let mut w = FrameWriter::with_capacity(capacity)?;

        w.raw(FRAME_DELIMITER);
        w.u16(frame.frame_type.code());
        w.u16(frame.data_size());
        w.bytes(&frame.data);
        w.u16(frame.checksum(self.mode));
        w.raw(FRAME_DELIMITER);

        Ok(w.finish())
    }

    /// Parse one frame from `buf`.
    ///
    /// Bytes after the closing delimiter are ignored.
    pub fn decode(&self, buf: &[u8]) -> Result<Frame> {
        if buf.len() < MIN_FRAME_SIZE {
            return Err(Error::TooShort {
                len: buf.len(),
                min: MIN_FRAME_SIZE,
            });
        }

        let mut r = FrameReader::new(buf);
        if r.raw() != Some(FRAME_DELIMITER) {
            return Err(Error::Framing("missing leading delimiter".into()));
        }

        let header_truncated = || Error::Framing("frame truncated in header".into());
        let frame_type = FrameType::from(r.u16().ok_or_else(header_truncated)?);
        let data_size = usize::from(r.u16().ok_or_else(header_truncated)?);

        let available = buf.len() - MIN_FRAME_SIZE;
        if data_size > available {
            return Err(Error::DataUnderflow {
                declared: data_size,
                available,
            });
        }

        let mut data = Vec::new();
        data.try_reserve_exact(data_size)
            .map_err(|_| Error::Allocation(data_size))?;
        for _ in 0..data_size {
            // Escapes can make the payload longer than the size check assumed.
            let byte = r.byte().ok_or_else(|| Error::DataUnderflow {
                declared: data_size,
                available: data.len(),
            })?;
            data.push(byte);
        }

        let frame = Frame { frame_type, data };
        let expected = frame.checksum(self.mode);
        let actual = r
            .u16()
            .ok_or_else(|| Error::Framing("frame truncated in checksum".into()))?;
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }

        if r.raw() != Some(FRAME_DELIMITER) {
            return Err(Error::Framing("missing trailing delimiter".into()));
        }

        if r.remaining() > 0 {
            trace!("Ignoring {} bytes after frame", r.remaining());
        }

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn both_modes() -> [FrameCodec; 2] {
        [
            FrameCodec::new(ChecksumMode::BootRom),
            FrameCodec::new(ChecksumMode::Fdl),
        ]
    }

    #[test]
    fn test_frame_type_codes_roundtrip() {
        for code in 0..=0xFFu16 {
            assert_eq!(FrameType::from(code).code(), code);
        }
        assert_eq!(FrameType::from(0x1234), FrameType::Unknown(0x1234));
        assert_eq!(FrameType::from(0x80), FrameType::Acknowledgement);
        assert_eq!(FrameType::from(0xA6), FrameType::VerificationFailure);
    }

    #[test]
    fn test_frame_type_labels() {
        assert_eq!(FrameType::StartDataTransfer.label(), Some("Start Data Transfer"));
        assert_eq!(FrameType::Unknown(0x07).label(), None);
        assert_eq!(FrameType::Unknown(0x07).to_string(), "Unknown");
        assert_eq!(FrameType::Banner.to_string(), "Banner");
    }

    #[test]
    fn test_with_data_rejects_oversized_payload() {
        let err = Frame::with_data(FrameType::DataTransfer, vec![0; MAX_DATA_SIZE + 1]);
        assert!(matches!(err, Err(Error::PayloadTooLarge(65536))));
        let ok = Frame::with_data(FrameType::DataTransfer, vec![0; MAX_DATA_SIZE]).unwrap();
        assert_eq!(ok.data_size(), 0xFFFF);
    }

    #[test]
    fn test_encode_connect_bootrom() {
        let codec = FrameCodec::new(ChecksumMode::BootRom);
        let wire = codec.encode(&Frame::new(FrameType::Connect)).unwrap();
        assert_eq!(wire, [0x7E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x7E]);
    }

    #[test]
    fn test_encode_ack_both_modes() {
        let ack = Frame::new(FrameType::Acknowledgement);
        let boot = FrameCodec::new(ChecksumMode::BootRom).encode(&ack).unwrap();
        let fdl = FrameCodec::new(ChecksumMode::Fdl).encode(&ack).unwrap();
        assert_eq!(boot, [0x7E, 0x00, 0x80, 0x00, 0x00, 0x3B, 0x5A, 0x7E]);
        assert_eq!(fdl, [0x7E, 0x00, 0x80, 0x00, 0x00, 0xFF, 0x7F, 0x7E]);
    }

    #[test]
    fn test_escape_delimiter_in_payload() {
        let codec = FrameCodec::new(ChecksumMode::BootRom);
        let frame = Frame::with_data(FrameType::DataTransfer, vec![0x7E]).unwrap();
        let wire = codec.encode(&frame).unwrap();
        assert_eq!(
            wire,
            [0x7E, 0x00, 0x02, 0x00, 0x01, 0x7D, 0x5E, 0x41, 0x00, 0x7E]
        );
        assert_eq!(codec.decode(&wire).unwrap().data(), &[0x7E]);
    }

    #[test]
    fn test_escape_in_checksum_field() {
        // FDL checksum of DataTransfer [0x7E] is 0xFF7E, so the low byte is stuffed.
        let codec = FrameCodec::new(ChecksumMode::Fdl);
        let frame = Frame::with_data(FrameType::DataTransfer, vec![0x7E]).unwrap();
        let wire = codec.encode(&frame).unwrap();
        assert_eq!(
            wire,
            [0x7E, 0x00, 0x02, 0x00, 0x01, 0x7D, 0x5E, 0xFF, 0x7D, 0x5E, 0x7E]
        );
        assert_eq!(codec.decode(&wire).unwrap(), frame);
    }

    #[test]
    fn test_roundtrip_all_byte_values() {
        let payload: Vec<u8> = (0..=255u8).chain([0x7D, 0x7E, 0x7D, 0x7E]).collect();
        for codec in both_modes() {
            let frame = Frame::with_data(FrameType::DataTransfer, payload.clone()).unwrap();
            let wire = codec.encode(&frame).unwrap();
            let inner = &wire[1..wire.len() - 1];
            assert!(!inner.contains(&FRAME_DELIMITER), "unescaped delimiter");
            assert_eq!(codec.decode(&wire).unwrap(), frame);
        }
    }

    #[test]
    fn test_roundtrip_unknown_type_and_max_payload() {
        for codec in both_modes() {
            let frame =
                Frame::with_data(FrameType::Unknown(0x7E7D), vec![0x7E; MAX_DATA_SIZE]).unwrap();
            let wire = codec.encode(&frame).unwrap();
            let decoded = codec.decode(&wire).unwrap();
            assert_eq!(decoded.frame_type(), FrameType::Unknown(0x7E7D));
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn test_modes_differ_only_in_checksum() {
        let frame = Frame::with_data(FrameType::Banner, b"SPRD3".to_vec()).unwrap();
        let boot = FrameCodec::new(ChecksumMode::BootRom).encode(&frame).unwrap();
        let fdl = FrameCodec::new(ChecksumMode::Fdl).encode(&frame).unwrap();
        // Neither checksum needs escaping here, so both are the same length.
        assert_eq!(boot.len(), fdl.len());
        let body = boot.len() - 3;
        assert_eq!(boot[..body], fdl[..body]);
        assert_eq!(boot[boot.len() - 1], fdl[fdl.len() - 1]);
        assert_eq!(&boot[body..body + 2], &[0x80, 0x1E]);
        assert_eq!(&fdl[body..body + 2], &[0x59, 0xB2]);
    }

    #[test]
    fn test_decode_minimum_frame() {
        let codec = FrameCodec::new(ChecksumMode::BootRom);
        let wire = [0x7E, 0x00, 0x80, 0x00, 0x00, 0x3B, 0x5A, 0x7E];
        let frame = codec.decode(&wire).unwrap();
        assert_eq!(frame.frame_type(), FrameType::Acknowledgement);
        assert!(frame.data().is_empty());
    }

    #[test]
    fn test_decode_too_short() {
        let codec = FrameCodec::new(ChecksumMode::BootRom);
        let wire = [0x7E, 0x00, 0x80, 0x00, 0x00, 0x3B, 0x5A];
        assert!(matches!(
            codec.decode(&wire),
            Err(Error::TooShort { len: 7, min: 8 })
        ));
        assert!(matches!(codec.decode(&[]), Err(Error::TooShort { len: 0, .. })));
    }

    #[test]
    fn test_decode_missing_leading_delimiter() {
        let codec = FrameCodec::new(ChecksumMode::BootRom);
        let wire = [0x00, 0x00, 0x80, 0x00, 0x00, 0x3B, 0x5A, 0x7E];
        assert!(matches!(codec.decode(&wire), Err(Error::Framing(_))));
    }

    #[test]
    fn test_decode_missing_trailing_delimiter() {
        let codec = FrameCodec::new(ChecksumMode::BootRom);
        let wire = [0x7E, 0x00, 0x80, 0x00, 0x00, 0x3B, 0x5A, 0x00];
        assert!(matches!(codec.decode(&wire), Err(Error::Framing(_))));
    }

    #[test]
    fn test_decode_data_underflow() {
        let codec = FrameCodec::new(ChecksumMode::BootRom);
        // Claims 0x0100 payload bytes in a 10 byte buffer.
        let wire = [0x7E, 0x00, 0x02, 0x01, 0x00, 0xAA, 0xBB, 0x00, 0x00, 0x7E];
        assert!(matches!(
            codec.decode(&wire),
            Err(Error::DataUnderflow {
                declared: 256,
                available: 2
            })
        ));
    }

    #[test]
    fn test_decode_escaped_payload_past_end_is_underflow() {
        let codec = FrameCodec::new(ChecksumMode::BootRom);
        // Size 2 passes the length check, but every payload byte is escaped
        // and the buffer ends first.
        let wire = [0x7E, 0x00, 0x02, 0x00, 0x02, 0x7D, 0x5E, 0x7D, 0x5E, 0x7D];
        assert!(matches!(
            codec.decode(&wire),
            Err(Error::Framing(_) | Error::DataUnderflow { .. })
        ));

        // Size 4 in a 12 byte buffer: the fourth escaped byte is cut off.
        let wire = [
            0x7E, 0x00, 0x02, 0x00, 0x04, 0x7D, 0x5E, 0x7D, 0x5E, 0x7D, 0x5E, 0x7D,
        ];
        assert!(matches!(
            codec.decode(&wire),
            Err(Error::DataUnderflow {
                declared: 4,
                available: 3
            })
        ));
    }

    #[test]
    fn test_decode_detects_single_bit_flip() {
        let payload: Vec<u8> = (0..64).collect();
        for codec in both_modes() {
            let frame = Frame::with_data(FrameType::DataTransfer, payload.clone()).unwrap();
            let wire = codec.encode(&frame).unwrap();
            // Payload starts after delimiter, type and size (no escapes in this header).
            for index in 5..5 + payload.len() {
                for bit in 0..8 {
                    let mut corrupted = wire.clone();
                    corrupted[index] ^= 1u8 << bit;
                    if corrupted[index] == ESCAPE || corrupted[index] == FRAME_DELIMITER {
                        // No longer a single flipped payload byte on the wire.
                        continue;
                    }
                    assert!(
                        matches!(
                            codec.decode(&corrupted),
                            Err(Error::ChecksumMismatch { .. })
                        ),
                        "flip of bit {bit} at {index} not detected in {:?}",
                        codec.mode()
                    );
                }
            }
        }
    }

    #[test]
    fn test_decode_corrupted_header_is_rejected() {
        let codec = FrameCodec::new(ChecksumMode::BootRom);
        let mut wire = codec.encode(&Frame::new(FrameType::Acknowledgement)).unwrap();
        wire[2] = 0x89; // Acknowledgement -> DestinationError
        assert!(matches!(
            codec.decode(&wire),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_under_wrong_mode_fails() {
        let wire = FrameCodec::new(ChecksumMode::Fdl)
            .encode(&Frame::new(FrameType::Acknowledgement))
            .unwrap();
        assert!(matches!(
            FrameCodec::new(ChecksumMode::BootRom).decode(&wire),
            Err(Error::ChecksumMismatch {
                expected: 0x3B5A,
                actual: 0xFF7F
            })
        ));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let codec = FrameCodec::new(ChecksumMode::BootRom);
        let mut wire = codec.encode(&Frame::new(FrameType::Acknowledgement)).unwrap();
        wire.extend_from_slice(&[0x00, 0x00, 0x00]);
        assert_eq!(
            codec.decode(&wire).unwrap().frame_type(),
            FrameType::Acknowledgement
        );
    }

    #[test]
    fn test_set_mode_applies_to_next_frame() {
        let mut codec = FrameCodec::default();
        assert_eq!(codec.mode(), ChecksumMode::BootRom);
        codec.set_mode(ChecksumMode::Fdl);
        let wire = codec.encode(&Frame::new(FrameType::Connect)).unwrap();
        assert_eq!(&wire[5..7], &[0xFF, 0xFF]);
    }
}
