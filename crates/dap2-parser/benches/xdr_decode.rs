//! Benchmarks for DAP2 metadata parsing and XDR decoding.
//!
//! Run with: cargo bench --package dap2-parser
//! Or: cargo bench --package dap2-parser --bench xdr_decode

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use dap2_parser::{decode_dods, parse_das, parse_dds, stream_sequence};
use test_utils::{create_indexed_cube, dods_response, fixtures, XdrWriter};

// =============================================================================
// METADATA PARSING BENCHMARKS
// =============================================================================

fn bench_metadata_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("metadata_parsing");

    group.bench_function("parse_dds_mixed", |b| {
        b.iter(|| parse_dds(black_box(fixtures::MIXED_DDS)))
    });

    group.bench_function("parse_das_sst", |b| {
        b.iter(|| parse_das(black_box(fixtures::SST_DAS)))
    });

    group.finish();
}

// =============================================================================
// ARRAY DECODING BENCHMARKS
// =============================================================================

fn bench_array_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("xdr_array_decoding");

    for &(ny, nx) in &[(90usize, 180usize), (360, 720)] {
        let dds = format!(
            "Dataset {{\n    Float32 SST[TIME = 1][Y = {}][X = {}];\n}} example;\n",
            ny, nx
        );
        let values = create_indexed_cube(1, ny, nx);
        let mut w = XdrWriter::new();
        w.f32_array(&values);
        let response = dods_response(&dds, &w.into_bytes());

        group.throughput(Throughput::Bytes(response.len() as u64));
        group.bench_with_input(BenchmarkId::new("float32_cube", format!("{}x{}", ny, nx)), &response, |b, r| {
            b.iter(|| decode_dods(black_box(r)))
        });
    }

    group.finish();
}

// =============================================================================
// SEQUENCE STREAMING BENCHMARKS
// =============================================================================

fn bench_sequence_streaming(c: &mut Criterion) {
    let mut group = c.benchmark_group("xdr_sequence_streaming");

    let records = 10_000;
    let mut w = XdrWriter::new();
    for i in 0..records {
        w.start_record().i32(i).i16((i % 100) as i16);
    }
    w.end_sequence();
    let response = Bytes::from(dods_response(fixtures::SEQUENCE_DDS, &w.into_bytes()));

    group.throughput(Throughput::Elements(records as u64));
    group.bench_function("stream_10k_records", |b| {
        b.iter(|| {
            let stream = stream_sequence(black_box(response.clone()), "casts").unwrap();
            stream.filter(|r| r.is_ok()).count()
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_metadata_parsing,
    bench_array_decoding,
    bench_sequence_streaming,
);

criterion_main!(benches);
