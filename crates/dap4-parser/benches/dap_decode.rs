//! Benchmarks for DAP4 chunk handling and payload decoding.
//!
//! Run with: cargo bench --package dap4-parser
//! Or: cargo bench --package dap4-parser --bench dap_decode

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use dap4_parser::{decode_dap, parse_dmr, read_chunks, ChecksumMode};
use test_utils::{create_indexed_cube, fixtures, ChunkWriter, Dap4Writer};

// =============================================================================
// DMR PARSING BENCHMARKS
// =============================================================================

fn bench_dmr_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("dmr_parsing");

    group.bench_function("parse_full_dmr", |b| b.iter(|| parse_dmr(black_box(fixtures::FULL_DMR))));
    group.bench_function("parse_grouped_dmr", |b| b.iter(|| parse_dmr(black_box(fixtures::ATL03_DMR))));

    group.finish();
}

// =============================================================================
// CHUNKED PAYLOAD BENCHMARKS
// =============================================================================

fn bench_payload_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("dap4_payload_decoding");

    let n = 180 * 360;
    let values = create_indexed_cube(1, 180, 360);
    let dmr = fixtures::single_variable_dmr("sst", "Float32", n);

    for (label, little) in [("big_endian", false), ("little_endian", true)] {
        let mut w = Dap4Writer::new(little);
        w.f32_values(&values);
        let writer = if little { ChunkWriter::little_endian() } else { ChunkWriter::new() };
        let response = writer.response(&dmr, &w.into_bytes());

        group.throughput(Throughput::Bytes(response.len() as u64));
        group.bench_with_input(BenchmarkId::new("float32_64k", label), &response, |b, r| {
            b.iter(|| decode_dap(black_box(r), ChecksumMode::None))
        });
    }

    let mut w = Dap4Writer::new(false);
    w.f32_values(&values);
    let checked = ChunkWriter::new()
        .with_chunk_checksums()
        .with_chunk_size(16 * 1024)
        .response(&dmr, &w.into_bytes());
    group.bench_function("dechunk_with_crc", |b| b.iter(|| read_chunks(black_box(&checked), true)));

    group.finish();
}

criterion_group!(benches, bench_dmr_parsing, bench_payload_decoding);

criterion_main!(benches);
