//! Rust implementation of the SDLC link layer
//!
//! This module provides the data-link side of the controller: frame
//! delimiting and validation, CRC-16 frame check sequences, and the mod-8
//! send/receive sequence discipline of a secondary SDLC station.
//!
//! # Overview
//!
//! SDLC (Synchronous Data Link Control) carries every exchange between the
//! host channel side and the attached cluster stations. A frame is a flag-
//! delimited span `7E | addr | ctrl | payload | FCS | 7E`; information
//! frames carry an SNA PIU as their payload, supervisory frames pace the
//! poll cycle, and unnumbered frames manage the link mode itself.
//!
//! # Architecture
//!
//! The module is organized into several submodules:
//!
//! - [`codes`] - frame delimiters, control-byte formats and command codes
//! - [`crc`] - CRC-16 frame check sequence (polynomial 0xA001)
//! - [`cursor`] - bounds-checked reader over received frame spans
//! - [`framer`] - inbound frame assembly and outbound build/stamping

pub mod codes;
pub mod crc;
pub mod cursor;
pub mod framer;

// Re-exports for easy access
pub use codes::*;
pub use cursor::FrameCursor;
pub use framer::{FrameFormat, FrameKind, LinkSequence, PendingFrame, SdlcFrame, SdlcFramer};

/// Render a buffer as the 16-bytes-per-row hex dump used in link traces.
pub fn hex_dump(buf: &[u8]) -> String {
    let mut out = String::with_capacity(buf.len() * 3 + buf.len() / 16 + 1);
    for (i, byte) in buf.iter().enumerate() {
        if i > 0 && i % 16 == 0 {
            out.push('\n');
        }
        out.push_str(&format!("{byte:02X} "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::hex_dump;

    #[test]
    fn hex_dump_wraps_every_sixteen_bytes() {
        let buf: Vec<u8> = (0u8..18).collect();
        let dump = hex_dump(&buf);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00 01 02"));
        assert!(lines[1].starts_with("10 11"));
    }
}
