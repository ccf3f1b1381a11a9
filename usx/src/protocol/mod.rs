//! Protocol implementations.

pub mod checksum;
pub mod frame;

// Re-export common types
pub use checksum::{ChecksumMode, FdlChecksum, crc16_bootrom};
pub use frame::{FRAME_DELIMITER, Frame, FrameCodec, FrameType, MAX_DATA_SIZE, MIN_FRAME_SIZE};
