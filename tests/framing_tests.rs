//! SDLC framing integration tests
//!
//! Covers the frame check sequence, inbound delimiting, poll-time sequence
//! stamping and the link-level receive discipline.

use cc3705r::error::FramingError;
use cc3705r::libsdlc::crc::{crc16, fcs_bytes};
use cc3705r::libsdlc::{
    ctrl_nr, ctrl_ns, FrameFormat, LinkSequence, PendingFrame, SdlcFramer, CFINAL, FLAG, RR,
};

fn encode_one(address: u8, control: u8, payload: &[u8]) -> Vec<u8> {
    let mut wire = vec![FLAG, address, control];
    wire.extend_from_slice(payload);
    let (hi, lo) = fcs_bytes(crc16(&wire[1..]));
    wire.push(hi);
    wire.push(lo);
    wire.push(FLAG);
    wire
}

#[test]
fn framing_then_validating_always_succeeds() {
    let framer = SdlcFramer::new();
    let payload = [0x2E, 0x00, 0x03, 0x00, 0x00, 0x01, 0x03, 0x80, 0x20, 0xF5];
    let wire = encode_one(0xC1, 0x00, &payload);
    let frames = framer.decode_all(&wire).expect("own frame must validate");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload, payload);
}

#[test]
fn corrupted_payload_byte_discards_the_frame() {
    let framer = SdlcFramer::new();
    let payload = [0x2E, 0x00, 0x03, 0x00, 0x00, 0x01, 0x03, 0x80, 0x20, 0x11];
    let mut wire = encode_one(0xC1, 0x00, &payload);
    wire[7] ^= 0x01; // flip one payload bit between the flags
    assert!(framer.decode_all(&wire).is_err());
}

#[test]
fn in_order_iframes_are_accepted_and_skips_are_rejected() {
    // N(s) = 0..N-1 mod 8 must be accepted in order; any skip is refused.
    let mut seq = LinkSequence::default();
    for n in 0..20u8 {
        assert!(seq.accept_ns(n % 8).is_ok(), "frame {n} should be accepted");
    }
    assert_eq!(seq.nr, 20 % 8);
    let expected = seq.nr;
    let skipped = (expected + 1) % 8;
    assert_eq!(
        seq.accept_ns(skipped),
        Err(FramingError::SequenceMismatch { expected, got: skipped })
    );
    // The counter holds its place for the retransmission.
    assert!(seq.accept_ns(expected).is_ok());
}

#[test]
fn restamping_happens_at_transmit_time_not_build_time() {
    // Two responses are queued while the receive count keeps moving; the
    // control bytes must carry the count at poll time.
    let framer = SdlcFramer::new();
    let queued = vec![
        PendingFrame::information(0xC1, vec![0x01]),
        PendingFrame::information(0xC1, vec![0x02]),
    ];

    // More inbound I-frames arrive before the poll.
    let mut seq = LinkSequence::default();
    for n in 0..5u8 {
        seq.accept_ns(n).unwrap();
    }

    let wire = framer.stamp_batch(&mut seq, &queued);
    let frames = framer.decode_all(&wire).unwrap();
    assert_eq!(frames.len(), 2);
    for frame in &frames {
        assert_eq!(ctrl_nr(frame.control), 5);
    }
    assert_eq!(ctrl_ns(frames[0].control), 0);
    assert_eq!(ctrl_ns(frames[1].control), 1);
    // Final bit on the last frame only.
    assert_eq!(frames[0].control & CFINAL, 0);
    assert_ne!(frames[1].control & CFINAL, 0);
}

#[test]
fn supervisory_frames_carry_only_the_receive_count() {
    let framer = SdlcFramer::new();
    let mut seq = LinkSequence { nr: 3, ns: 6 };
    let wire = framer.stamp_batch(&mut seq, &[PendingFrame::supervisory(0xC1, RR)]);
    let frames = framer.decode_all(&wire).unwrap();
    match frames[0].format() {
        FrameFormat::Supervisory { function, nr, poll } => {
            assert_eq!(function, RR);
            assert_eq!(nr, 3);
            assert!(poll); // final bit on a single-frame batch
        }
        other => panic!("expected supervisory frame, got {other:?}"),
    }
    // Stamping an S-frame must not consume a send sequence number.
    assert_eq!(seq.ns, 6);
}

#[test]
fn many_random_frames_in_one_buffer_round_trip() {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x3705);
    let framer = SdlcFramer::new();
    let mut wire = Vec::new();
    let mut payloads = Vec::new();
    for _ in 0..10 {
        let len = rng.gen_range(0..64);
        let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        wire.extend(encode_one(0xC1, 0x00, &payload));
        payloads.push(payload);
    }
    let frames = framer.decode_all(&wire).unwrap();
    assert_eq!(frames.len(), payloads.len());
    for (frame, payload) in frames.iter().zip(&payloads) {
        assert_eq!(&frame.payload, payload);
    }
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any payload frames and validates with the same algorithm.
        #[test]
        fn round_trip_any_payload(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let framer = SdlcFramer::new();
            let wire = encode_one(0xC1, 0x00, &payload);
            let frames = framer.decode_all(&wire).unwrap();
            prop_assert_eq!(frames.len(), 1);
            prop_assert_eq!(&frames[0].payload, &payload);
        }

        /// A corrupted frame never decodes back to the original content.
        #[test]
        fn corruption_never_yields_the_original(
            payload in proptest::collection::vec(any::<u8>(), 1..128),
            flip in 0usize..128,
            bit in 0u8..8,
        ) {
            let framer = SdlcFramer::new();
            let wire = encode_one(0xC1, 0x00, &payload);
            let mut corrupted = wire.clone();
            // Corrupt one bit strictly between the flags.
            let index = 1 + (flip % (corrupted.len() - 2));
            corrupted[index] ^= 1 << bit;
            prop_assume!(corrupted != wire);

            match framer.decode_all(&corrupted) {
                Ok(frames) => {
                    // If some boundary still validates, the content differs.
                    prop_assert!(
                        frames.len() != 1
                            || frames[0].payload != payload
                            || frames[0].address != 0xC1
                            || frames[0].control != 0x00
                    );
                }
                Err(_) => {}
            }
        }

        /// crc16 is a pure function of its input.
        #[test]
        fn crc_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(crc16(&data), crc16(&data));
        }
    }
}
