//! Criterion benchmarks for the stream hot path.
//!
//! Benchmarks:
//! 1. Line buffering alone at several chunk sizes
//! 2. Full decode (line split + JSON parse) at several chunk sizes
//! 3. Decode + reduce into `RunState`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stratstream_core::{FrameDecoder, LineBuffer, RunState};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_body(n: usize) -> Vec<u8> {
    let mut out = String::new();
    for i in 0..n {
        let day = 1 + (i % 28);
        out.push_str(&format!(
            "data: {{\"type\":\"progress\",\"data\":{{\"current_date\":\"2024-01-{day:02}\"}}}}\n\n"
        ));
        let signal = if i % 2 == 0 { "BUY" } else { "SELL" };
        out.push_str(&format!(
            "data: {{\"type\":\"trade\",\"data\":{{\"time\":\"2024-01-{day:02}\",\"signal\":\"{signal}\",\
             \"price\":{:.2},\"reason\":\"cross\",\"balance\":{:.2},\"realized_pnl\":{:.2}}}}}\n\n",
            3500.0 + (i as f64 * 0.1).sin() * 50.0,
            200_000.0 + i as f64,
            i as f64 * 3.0,
        ));
        if i % 30 == 0 {
            out.push_str(
                "data: {\"type\":\"agent\",\"data\":{\"action\":\"no_change\",\"message\":\"parameters hold\"}}\n\n",
            );
        }
    }
    out.into_bytes()
}

const CHUNK_SIZES: [usize; 3] = [64, 1024, 16 * 1024];

// ── 1. Line buffer ───────────────────────────────────────────────────

fn bench_line_buffer(c: &mut Criterion) {
    let body = make_body(2_000);
    let mut group = c.benchmark_group("line_buffer");
    group.throughput(Throughput::Bytes(body.len() as u64));

    for size in CHUNK_SIZES {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut buf = LineBuffer::new();
                let mut n = 0usize;
                for chunk in body.chunks(size) {
                    n += buf.push(black_box(chunk)).len();
                }
                n
            })
        });
    }
    group.finish();
}

// ── 2. Frame decode ──────────────────────────────────────────────────

fn bench_decode(c: &mut Criterion) {
    let body = make_body(2_000);
    let mut group = c.benchmark_group("frame_decode");
    group.throughput(Throughput::Bytes(body.len() as u64));

    for size in CHUNK_SIZES {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new();
                let mut n = 0usize;
                for chunk in body.chunks(size) {
                    n += decoder.push(black_box(chunk)).len();
                }
                n
            })
        });
    }
    group.finish();
}

// ── 3. Decode + reduce ───────────────────────────────────────────────

fn bench_reduce(c: &mut Criterion) {
    let body = make_body(2_000);

    c.bench_function("decode_and_reduce_1k_chunks", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            let mut state = RunState::new();
            state.begin_run();
            for chunk in body.chunks(1024) {
                for event in decoder.push(chunk) {
                    state.apply(event);
                }
            }
            black_box(state.messages.len())
        })
    });
}

criterion_group!(benches, bench_line_buffer, bench_decode, bench_reduce);
criterion_main!(benches);
