//! SDLC Framer
//!
//! Assembles and validates SDLC frames on the leased line. Inbound buffers
//! may carry several frames back to back, optionally preceded by a modem
//! clocking byte; each frame is delimited by 0x7E flags and protected by a
//! CRC-16 FCS. Outbound response frames are built unstamped and receive
//! their N(r)/N(s) sequence numbers, Final bit and FCS immediately before
//! transmission, because the receive count keeps moving while responses
//! wait for the poll.

use log::{debug, trace};

use super::codes::*;
use super::crc;
use super::cursor::FrameCursor;
use crate::error::FramingError;

/// A decoded inbound frame: address, raw control byte and the payload
/// between the control byte and the FCS.
#[derive(Debug, Clone, PartialEq)]
pub struct SdlcFrame {
    pub address: u8,
    pub control: u8,
    pub payload: Vec<u8>,
}

/// Control-byte interpretation of a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameFormat {
    /// Information frame carrying a PIU
    Information { ns: u8, nr: u8, poll: bool },
    /// Supervisory frame (RR/RNR/REJ)
    Supervisory { function: u8, nr: u8, poll: bool },
    /// Unnumbered command/response (SNRM/DISC/XID/UA/...)
    Unnumbered { command: u8, poll: bool },
}

impl SdlcFrame {
    pub fn format(&self) -> FrameFormat {
        let c = self.control;
        if c & 0x03 == FMT_UNNUMBERED {
            FrameFormat::Unnumbered { command: c & UNNUM_CMD_MASK, poll: ctrl_pf(c) }
        } else if c & 0x03 == FMT_SUPERVISORY {
            FrameFormat::Supervisory { function: c & 0x0F, nr: ctrl_nr(c), poll: ctrl_pf(c) }
        } else {
            // Bits 00 and 10 are both information frames.
            FrameFormat::Information { ns: ctrl_ns(c), nr: ctrl_nr(c), poll: ctrl_pf(c) }
        }
    }

    pub fn poll(&self) -> bool {
        ctrl_pf(self.control)
    }
}

/// Which sequence fields an outbound frame needs stamped at poll time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameKind {
    Information,
    Supervisory,
    Unnumbered,
}

/// An outbound frame waiting for the poll that releases it.
///
/// `control` holds the format/function bits only; the sequence fields are
/// inserted by [`SdlcFramer::stamp_batch`].
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFrame {
    pub address: u8,
    pub control: u8,
    pub kind: FrameKind,
    pub payload: Vec<u8>,
}

impl PendingFrame {
    pub fn information(address: u8, payload: Vec<u8>) -> Self {
        PendingFrame { address, control: 0x00, kind: FrameKind::Information, payload }
    }

    pub fn supervisory(address: u8, function: u8) -> Self {
        PendingFrame { address, control: function, kind: FrameKind::Supervisory, payload: Vec::new() }
    }

    pub fn unnumbered(address: u8, command: u8, payload: Vec<u8>) -> Self {
        PendingFrame { address, control: command, kind: FrameKind::Unnumbered, payload }
    }
}

/// Link-level mod-8 send/receive sequence counters for one station.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinkSequence {
    /// N(r): next send sequence number expected from the primary
    pub nr: u8,
    /// N(s): next send sequence number we will transmit
    pub ns: u8,
}

impl LinkSequence {
    pub fn reset(&mut self) {
        self.nr = 0;
        self.ns = 0;
    }

    /// Account for a received I-frame. The frame's N(s) must equal the
    /// expected receive count; anything else is a sequence error and the
    /// frame is not accepted.
    pub fn accept_ns(&mut self, ns: u8) -> Result<(), FramingError> {
        if ns != self.nr {
            return Err(FramingError::SequenceMismatch { expected: self.nr, got: ns });
        }
        self.nr = (self.nr + 1) % SEQ_MODULUS;
        Ok(())
    }
}

/// The framer proper. Stateless apart from the trace plumbing; sequence
/// state lives with the station so exactly one owner stamps it.
#[derive(Debug, Default)]
pub struct SdlcFramer;

impl SdlcFramer {
    pub fn new() -> Self {
        SdlcFramer
    }

    /// Split an inbound buffer into validated frames.
    ///
    /// A leading 0x00/0xAA modem clocking byte is discarded, runs of
    /// consecutive flags collapse to nothing, and each frame must end on a
    /// flag whose preceding two bytes check out as the FCS of the enclosed
    /// span. A span with no such closing position is dropped whole.
    pub fn decode_all(&self, buf: &[u8]) -> Result<Vec<SdlcFrame>, FramingError> {
        let mut frames = Vec::new();
        let mut cur = FrameCursor::new(buf);

        loop {
            // Skip a modem clocking byte if present.
            if matches!(cur.peek(), Some(CLOCKING_NUL) | Some(CLOCKING_ALT)) {
                cur.skip(1)?;
            }
            if cur.remaining() == 0 {
                break;
            }
            if cur.peek() != Some(FLAG) {
                return Err(FramingError::MissingFlag { at: cur.position() });
            }
            // Collapse the opening flag together with any idle-fill flags.
            while cur.peek() == Some(FLAG) {
                cur.skip(1)?;
            }
            if cur.remaining() == 0 {
                break; // buffer was nothing but flag fill
            }

            let span = cur.take_rest();
            let end = Self::find_frame_end(span)?;
            let content = &span[..end - 2];
            let frame = SdlcFrame {
                address: content[0],
                control: content[1],
                payload: content[2..].to_vec(),
            };
            trace!(
                "frame in: addr={:02X} ctrl={:02X} len={}",
                frame.address,
                frame.control,
                frame.payload.len()
            );
            frames.push(frame);

            // Re-seat the cursor past this frame's closing flag.
            cur = FrameCursor::new(&span[end + 1..]);
        }
        Ok(frames)
    }

    /// Locate the closing flag of the frame starting at `span[0]`.
    ///
    /// Returns the index of the first FCS byte + 2, i.e. the closing flag
    /// position. The closing flag is the first 0x7E whose two preceding
    /// bytes validate as the CRC of everything before them; a bare 0x7E
    /// inside the payload fails that check and is skipped.
    fn find_frame_end(span: &[u8]) -> Result<usize, FramingError> {
        let mut saw_flag = false;
        let mut base = MIN_SPAN;
        while base < span.len() {
            let Some(rel) = FrameCursor::new(&span[base..]).find_terminator(&[FLAG]) else {
                break;
            };
            let i = base + rel;
            saw_flag = true;
            if crc::check(&span[..i - 2], span[i - 2], span[i - 1]) {
                return Ok(i);
            }
            base = i + 1;
        }
        if saw_flag {
            Err(FramingError::CrcMismatch)
        } else {
            Err(FramingError::MissingTerminator)
        }
    }

    /// Stamp and serialize one pending response frame.
    ///
    /// S- and I-frames get the station's current N(r); I-frames also get
    /// the next N(s), which advances mod 8 only after insertion. `last`
    /// marks the final frame of a batch and carries the Final bit. The FCS
    /// is computed here, after the control byte reaches its final value.
    pub fn stamp_frame(&self, seq: &mut LinkSequence, frame: &PendingFrame, last: bool) -> Vec<u8> {
        let mut ctrl = frame.control;
        match frame.kind {
            FrameKind::Supervisory => {
                ctrl = (ctrl & 0x1F) | (seq.nr << 5);
            }
            FrameKind::Information => {
                ctrl = (ctrl & 0x1F) | (seq.nr << 5);
                ctrl = (ctrl & 0xF1) | (seq.ns << 1);
                seq.ns = (seq.ns + 1) % SEQ_MODULUS;
            }
            FrameKind::Unnumbered => {}
        }
        if last {
            ctrl |= CFINAL;
        }
        debug!(
            "frame out: addr={:02X} ctrl={:02X} len={} final={}",
            frame.address,
            ctrl,
            frame.payload.len(),
            last
        );
        let mut wire = Vec::new();
        Self::encode_into(&mut wire, frame.address, ctrl, &frame.payload);
        wire
    }

    /// Stamp and serialize a whole batch for one station; the last frame
    /// carries the Final bit.
    pub fn stamp_batch(&self, seq: &mut LinkSequence, batch: &[PendingFrame]) -> Vec<u8> {
        let mut wire = Vec::new();
        let last = batch.len().saturating_sub(1);
        for (i, frame) in batch.iter().enumerate() {
            wire.extend(self.stamp_frame(seq, frame, i == last));
        }
        wire
    }

    /// Serialize one frame: flag, address, control, payload, FCS, flag.
    fn encode_into(out: &mut Vec<u8>, address: u8, control: u8, payload: &[u8]) {
        out.push(FLAG);
        let body_start = out.len();
        out.push(address);
        out.push(control);
        out.extend_from_slice(payload);
        let (hi, lo) = crc::fcs_bytes(crc::crc16(&out[body_start..]));
        out.push(hi);
        out.push(lo);
        out.push(FLAG);
    }

    /// The reject sentinel scheduled after a framing error: an FRMR
    /// unnumbered response for the offending station.
    pub fn nak_frame(&self, address: u8) -> PendingFrame {
        PendingFrame::unnumbered(address, FRMR, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framer() -> SdlcFramer {
        SdlcFramer::new()
    }

    fn one_frame(address: u8, control: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        SdlcFramer::encode_into(&mut out, address, control, payload);
        out
    }

    #[test]
    fn round_trip_single_frame() {
        let wire = one_frame(0xC1, RR | CFINAL, &[]);
        let frames = framer().decode_all(&wire).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].address, 0xC1);
        assert_eq!(frames[0].control, RR | CFINAL);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn round_trip_with_payload_containing_flag_byte() {
        // 0x7E inside the payload must not terminate the frame early.
        let payload = [0x2E, 0x00, 0x7E, 0x03, 0x7E, 0x7E, 0x90];
        let wire = one_frame(0xC1, 0x00, &payload);
        let frames = framer().decode_all(&wire).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, payload);
    }

    #[test]
    fn clocking_byte_is_skipped() {
        let mut wire = vec![CLOCKING_NUL];
        wire.extend(one_frame(0xC1, SNRM | CPOLL, &[]));
        let frames = framer().decode_all(&wire).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].control, SNRM | CPOLL);
    }

    #[test]
    fn flag_fill_is_a_no_op() {
        let wire = [FLAG, FLAG, FLAG];
        let frames = framer().decode_all(&wire).unwrap();
        assert!(frames.is_empty());
    }

    #[test]
    fn corrupted_frame_is_a_crc_error() {
        let mut wire = one_frame(0xC1, 0x00, &[0x11, 0x22, 0x33]);
        wire[4] ^= 0x40; // flip a payload bit
        assert!(matches!(
            framer().decode_all(&wire),
            Err(FramingError::CrcMismatch)
        ));
    }

    #[test]
    fn multiple_frames_in_one_buffer() {
        let mut wire = one_frame(0xC1, 0x00, &[0xAA, 0xBB]);
        wire.extend(one_frame(0xC2, RR, &[]));
        let frames = framer().decode_all(&wire).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].address, 0xC1);
        assert_eq!(frames[1].address, 0xC2);
    }

    #[test]
    fn stamping_inserts_sequence_numbers_and_final_bit() {
        let mut seq = LinkSequence { nr: 5, ns: 2 };
        let batch = vec![
            PendingFrame::information(0xC1, vec![0x01]),
            PendingFrame::information(0xC1, vec![0x02]),
            PendingFrame::supervisory(0xC1, RR),
        ];
        let wire = framer().stamp_batch(&mut seq, &batch);
        let frames = framer().decode_all(&wire).unwrap();
        assert_eq!(frames.len(), 3);

        match frames[0].format() {
            FrameFormat::Information { ns, nr, poll } => {
                assert_eq!((ns, nr, poll), (2, 5, false));
            }
            other => panic!("expected I-frame, got {other:?}"),
        }
        match frames[1].format() {
            FrameFormat::Information { ns, nr, poll } => {
                assert_eq!((ns, nr, poll), (3, 5, false));
            }
            other => panic!("expected I-frame, got {other:?}"),
        }
        // Final bit only on the batch's last frame.
        match frames[2].format() {
            FrameFormat::Supervisory { function, nr, poll } => {
                assert_eq!((function, nr, poll), (RR, 5, true));
            }
            other => panic!("expected S-frame, got {other:?}"),
        }
        assert_eq!(seq.ns, 4);
    }

    #[test]
    fn sequence_acceptance_tracks_mod_8() {
        let mut seq = LinkSequence::default();
        for ns in 0..10u8 {
            seq.accept_ns(ns % 8).unwrap();
        }
        assert_eq!(seq.nr, 2);
        assert!(matches!(
            seq.accept_ns(5),
            Err(FramingError::SequenceMismatch { expected: 2, got: 5 })
        ));
        // A rejected frame does not advance the counter.
        assert_eq!(seq.nr, 2);
    }

    #[test]
    fn nak_is_a_frame_reject() {
        let nak = framer().nak_frame(0xC1);
        assert_eq!(nak.kind, FrameKind::Unnumbered);
        assert_eq!(nak.control, FRMR);
    }
}
