//! Human-readable wire dumps.
//!
//! When a [`Downloader`](crate::Downloader) runs verbose, every buffer it
//! transmits or receives and every frame it encodes or decodes is logged at
//! `info` level under the [`WIRE_TARGET`] log target, so `RUST_LOG=usx::wire`
//! isolates the traffic from the rest of the output.

use std::fmt::Write as _;

use log::info;

use crate::protocol::{ChecksumMode, Frame};

/// Log target used for wire tracing.
pub const WIRE_TARGET: &str = "usx::wire";

const BYTES_PER_LINE: usize = 16;

/// Format `buf` as a classic 16-bytes-per-line hex dump.
///
/// Each line is the offset, eight groups of two bytes, and the printable
/// ASCII rendering with `.` standing in for everything else:
///
/// ```text
///   00000000: 7e00 8100 0553 5052 4433 801e 7e         ~....SPRD3..~
/// ```
pub fn hex_dump(buf: &[u8]) -> String {
    let mut out = String::new();

    for (line, chunk) in buf
        .chunks(BYTES_PER_LINE)
        .enumerate()
    {
        let _ = write!(out, "  {:08x}: ", line * BYTES_PER_LINE);

        for idx in 0..BYTES_PER_LINE {
            match chunk.get(idx) {
                Some(byte) => {
                    let _ = write!(out, "{byte:02x}");
                },
                None => out.push_str("  "),
            }
            if idx % 2 == 1 {
                out.push(' ');
            }
        }

        out.push(' ');
        out.extend(
            chunk
                .iter()
                .map(|&b| {
                    if b == b' ' || b.is_ascii_graphic() {
                        char::from(b)
                    } else {
                        '.'
                    }
                }),
        );
        out.push('\n');
    }

    out
}

/// Describe a frame's header fields and its checksum under `mode`.
pub fn describe_frame(frame: &Frame, mode: ChecksumMode) -> String {
    let frame_type = frame.frame_type();
    format!(
        "  Frame Type:    {:04x} ({frame_type})\n  Data Size:     {:04x}\n  Checksum:      {:04x}\n",
        frame_type.code(),
        frame.data_size(),
        frame.checksum(mode)
    )
}

/// Log a raw buffer with a direction tag such as `TX` or `RX`.
pub(crate) fn log_buffer(direction: &str, buf: &[u8]) {
    info!(target: WIRE_TARGET, "{direction} ({} bytes)\n{}", buf.len(), hex_dump(buf));
}

/// Log a decoded frame.
pub(crate) fn log_frame(frame: &Frame, mode: ChecksumMode) {
    info!(target: WIRE_TARGET, "\n{}", describe_frame(frame, mode));
}
