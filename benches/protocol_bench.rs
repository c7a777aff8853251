use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cc3705r::libsdlc::crc::{crc16, fcs_bytes};
use cc3705r::libsdlc::{LinkSequence, PendingFrame, SdlcFramer, CPOLL, FLAG, RR};
use cc3705r::libsna::{build_piu, PiuEngine, SessionTable};
use cc3705r::terminal::TerminalLink;

// Mock terminal for benchmarking: always has a record pending.
struct BenchTerminal {
    record: Vec<u8>,
}

impl TerminalLink for BenchTerminal {
    fn has_pending_output(&self, _station: usize, _lu: usize) -> bool {
        true
    }

    fn take_pending_output(&mut self, _station: usize, _lu: usize) -> Option<Vec<u8>> {
        Some(self.record.clone())
    }

    fn forward3270(&mut self, _station: usize, _lu: usize, _data: &[u8]) {}
}

fn encode_one(address: u8, control: u8, payload: &[u8]) -> Vec<u8> {
    let mut wire = vec![FLAG, address, control];
    wire.extend_from_slice(payload);
    let (hi, lo) = fcs_bytes(crc16(&wire[1..]));
    wire.push(hi);
    wire.push(lo);
    wire.push(FLAG);
    wire
}

fn bench_crc16(c: &mut Criterion) {
    let data: Vec<u8> = (0..=255u8).cycle().take(1024).collect();
    c.bench_function("crc16_1k", |b| {
        b.iter(|| black_box(crc16(black_box(&data))));
    });
}

fn bench_decode_frame(c: &mut Criterion) {
    // A data PIU inside an I-frame, the hot inbound path.
    let piu = build_piu(
        [0x2E, 0x00, 0x02, 0x00, 0x00, 0x01],
        [0x03, 0x80, 0x20],
        &[0xF5; 256],
    );
    let wire = encode_one(0xC1, CPOLL, &piu);
    let framer = SdlcFramer::new();
    c.bench_function("decode_data_frame", |b| {
        b.iter(|| black_box(framer.decode_all(black_box(&wire))).unwrap());
    });
}

fn bench_rr_poll(c: &mut Criterion) {
    // RR polling an LU with pending input: scan + data PIU build + stamp.
    let framer = SdlcFramer::new();
    let frame = framer.decode_all(&encode_one(0xC1, RR | CPOLL, &[])).unwrap().remove(0);

    let mut engine = PiuEngine::new();
    let mut sessions = SessionTable::new(&[0xC1], 4);
    {
        let lu = sessions.station_mut(0).unwrap().lu_mut(0).unwrap();
        lu.attached = true;
        lu.actlu = true;
        lu.readylu = 1;
        lu.daf_addr = 0x40;
    }
    let mut terminal = BenchTerminal { record: vec![0x7D; 64] };

    c.bench_function("rr_poll_with_pending_input", |b| {
        b.iter(|| {
            let responses = engine
                .process_frame(black_box(&frame), &mut sessions, &mut terminal, false)
                .unwrap();
            let mut seq = LinkSequence::default();
            black_box(framer.stamp_batch(&mut seq, &responses))
        });
    });
}

fn bench_stamp_batch(c: &mut Criterion) {
    let framer = SdlcFramer::new();
    let batch: Vec<PendingFrame> = (0..4)
        .map(|i| PendingFrame::information(0xC1, vec![i as u8; 32]))
        .collect();
    c.bench_function("stamp_batch_of_4", |b| {
        b.iter(|| {
            let mut seq = LinkSequence::default();
            black_box(framer.stamp_batch(&mut seq, black_box(&batch)))
        });
    });
}

criterion_group!(
    benches,
    bench_crc16,
    bench_decode_frame,
    bench_rr_poll,
    bench_stamp_batch
);
criterion_main!(benches);
