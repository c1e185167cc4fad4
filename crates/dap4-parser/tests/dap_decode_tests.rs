//! End-to-end tests for `.dap` response decoding.
//!
//! Responses are framed with the `ChunkWriter` from `test-utils`, covering
//! both header byte orders, server error chunks and checksums.

use dap4_parser::{decode_dap, detect_framing, parse_dmr, ByteOrder, ChecksumMode};
use dap_model::{ArrayData, DapError, Scalar, Value, Variable};
use test_utils::{assert_approx_eq, create_ramp, fixtures, ChunkWriter, Dap4Writer};

fn ramp_f32(n: usize) -> Vec<f32> {
    (0..n).map(|i| i as f32 * 0.5).collect()
}

// ============================================================================
// Framing and endianness
// ============================================================================

#[test]
fn test_both_framings_decode_to_the_same_values() {
    let dmr = fixtures::single_variable_dmr("h_ph", "Float32", 10);
    let values = ramp_f32(10);

    let mut decoded = Vec::new();
    for (writer, little, expected_order) in [
        (ChunkWriter::new(), false, ByteOrder::Big),
        (ChunkWriter::little_endian(), true, ByteOrder::Little),
    ] {
        let mut w = Dap4Writer::new(little);
        w.f32_values(&values);
        let response = writer.with_chunk_size(7).response(&dmr, &w.into_bytes());

        assert_eq!(detect_framing(&response).unwrap(), expected_order);
        let ds = decode_dap(&response, ChecksumMode::None).unwrap();
        decoded.push(ds.leaf("/h_ph").unwrap().data().cloned());
    }
    assert_eq!(decoded[0], Some(ArrayData::F32(values)));
    assert_eq!(decoded[0], decoded[1]);
}

#[test]
fn test_detection_over_many_lengths() {
    // Whatever the DMR length, detection picks the order used to encode
    for n in 1..40 {
        let dmr = fixtures::single_variable_dmr("v", "Int32", n);
        for little in [false, true] {
            let writer = if little { ChunkWriter::little_endian() } else { ChunkWriter::new() };
            let mut w = Dap4Writer::new(little);
            w.i32_values(&(0..n as i32).collect::<Vec<_>>());
            let response = writer.response(&dmr, &w.into_bytes());
            let expected = if little { ByteOrder::Little } else { ByteOrder::Big };
            assert_eq!(detect_framing(&response).unwrap(), expected, "n = {}", n);
        }
    }
}

#[test]
fn test_error_chunk_first() {
    let response = ChunkWriter::new().error_response("Error { code = 404; message = \"no such file\"; }");
    let err = decode_dap(&response, ChecksumMode::Auto).unwrap_err();
    match err {
        DapError::Protocol(message) => assert!(message.contains("no such file")),
        other => panic!("expected a protocol error, got {:?}", other),
    }
}

#[test]
fn test_error_chunk_little_endian() {
    let response = ChunkWriter::little_endian().error_response("server exploded");
    let err = decode_dap(&response, ChecksumMode::None).unwrap_err();
    assert!(err.to_string().contains("server exploded"));
}

// ============================================================================
// Payload layout
// ============================================================================

#[test]
fn test_grouped_dataset() {
    let mut w = Dap4Writer::new(false);
    w.f64_values(&create_ramp(100))
        .f32_values(&ramp_f32(100))
        .f64_values(&create_ramp(100));
    let response = ChunkWriter::new().with_chunk_size(256).response(fixtures::ATL03_DMR, &w.into_bytes());

    let ds = decode_dap(&response, ChecksumMode::Auto).unwrap();
    let h = ds.leaf("/gt1r/heights/h_ph").unwrap();
    assert_eq!(h.shape(), vec![100]);
    assert_eq!(h.data().and_then(|d| d.get(3)), Some(Scalar::F32(1.5)));
    let lat = ds.leaf("/gt1r/heights/lat_ph").and_then(|l| l.data()).and_then(ArrayData::to_f64_vec).unwrap();
    assert_approx_eq!(lat[99], 99.0, 1e-12);
    assert!(ds.leaf("/gt1r/heights/lat_ph").unwrap().is_materialized());
}

#[test]
fn test_every_element_kind() {
    let mut w = Dap4Writer::new(true);
    w.i64(1).i64(-2).i64(3) // counts
        .u8(1) // flag
        .string("survey") // title
        .f32(-70.5)
        .f32(41.25) // point
        .record_count(2)
        .i32(10)
        .string("a")
        .i32(11)
        .string("bb") // obs
        .opaque(&[0xDE, 0xAD]) // blob
        .f64(1.0)
        .f64(2.0); // anon
    let response = ChunkWriter::little_endian().response(fixtures::FULL_DMR, &w.into_bytes());

    let ds = decode_dap(&response, ChecksumMode::None).unwrap();
    assert_eq!(ds.leaf("/counts").unwrap().data(), Some(&ArrayData::I64(vec![1, -2, 3])));
    let flag = ds.leaf("/flag").unwrap();
    assert_eq!(flag.data(), Some(&ArrayData::U8(vec![1])));
    assert_eq!(ds.enumeration("/quality").and_then(|e| e.label(1)), Some("bad"));
    assert_eq!(ds.leaf("/point.lat").unwrap().data(), Some(&ArrayData::F32(vec![41.25])));

    let records = ds.sequence("/obs").unwrap().records().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].get(1), Some(&Value::Scalar(Scalar::Str("bb".into()))));
    assert_eq!(ds.leaf("/anon").unwrap().data(), Some(&ArrayData::F64(vec![1.0, 2.0])));
}

#[test]
fn test_partial_response_decodes_only_declared_variables() {
    // A constrained request returns a DMR with only the requested variable
    let dmr = fixtures::single_variable_dmr("lat_ph", "Float64", 10);
    let mut w = Dap4Writer::new(false);
    w.f64_values(&create_ramp(10));
    let response = ChunkWriter::new().response(&dmr, &w.into_bytes());
    let ds = decode_dap(&response, ChecksumMode::Auto).unwrap();
    assert_eq!(ds.walk().len(), 1);
    assert_eq!(ds.leaf("/lat_ph").unwrap().size(), 10);
}

#[test]
fn test_short_payload_is_never_truncated() {
    let dmr = fixtures::single_variable_dmr("v", "Int32", 4);
    let mut w = Dap4Writer::new(false);
    w.i32_values(&[1, 2, 3]);
    let response = ChunkWriter::new().response(&dmr, &w.into_bytes());
    assert!(matches!(decode_dap(&response, ChecksumMode::None), Err(DapError::Protocol(_))));
}

#[test]
fn test_huge_string_array_without_payload_is_rejected() {
    let dmr = fixtures::single_variable_dmr("s", "String", 1_000_000_000_000);
    let mut w = Dap4Writer::new(false);
    w.string("");
    let response = ChunkWriter::new().response(&dmr, &w.into_bytes());
    assert!(matches!(decode_dap(&response, ChecksumMode::None), Err(DapError::Protocol(_))));
}

#[test]
fn test_overflowing_dimension_product_is_metadata_error() {
    let dmr = r#"<Dataset name="d">
    <Int32 name="v"><Dim size="4294967296"/><Dim size="4294967296"/><Dim size="4294967296"/></Int32>
</Dataset>"#;
    let response = ChunkWriter::new().response(dmr, &[]);
    let err = decode_dap(&response, ChecksumMode::None).unwrap_err();
    assert!(matches!(err, DapError::MetadataParse { .. }));
}

// ============================================================================
// Checksums
// ============================================================================

fn checksummed_response(corrupt: bool) -> bytes::Bytes {
    let mut w = Dap4Writer::new(false);
    w.begin_variable().i32_values(&[4, 3, 2, 1]).end_variable_with_checksum();
    let mut payload = w.into_bytes();
    if corrupt {
        payload[5] ^= 0x40;
    }
    ChunkWriter::new().response(fixtures::CHECKSUMMED_DMR, &payload)
}

#[test]
fn test_per_variable_checksum_announced_by_dmr() {
    let ds = decode_dap(&checksummed_response(false), ChecksumMode::Auto).unwrap();
    assert_eq!(ds.leaf("/v").unwrap().data(), Some(&ArrayData::I32(vec![4, 3, 2, 1])));
    assert!(parse_dmr(fixtures::CHECKSUMMED_DMR).is_ok());
}

#[test]
fn test_corrupted_checksum_never_returns_data() {
    for mode in [ChecksumMode::Auto, ChecksumMode::PerVariable] {
        let err = decode_dap(&checksummed_response(true), mode).unwrap_err();
        assert!(matches!(err, DapError::Checksum { ref variable, .. } if variable == "/v"));
    }
}

#[test]
fn test_corrupted_chunk_checksum() {
    let dmr = fixtures::single_variable_dmr("v", "Int32", 4);
    let mut w = Dap4Writer::new(false);
    w.i32_values(&[1, 2, 3, 4]);
    let response = ChunkWriter::new()
        .with_chunk_size(8)
        .with_chunk_checksums()
        .response(&dmr, &w.into_bytes());
    let ok = decode_dap(&response, ChecksumMode::PerChunk).unwrap();
    assert_eq!(ok.leaf("/v").unwrap().data(), Some(&ArrayData::I32(vec![1, 2, 3, 4])));

    let mut corrupt = response.to_vec();
    let last_data_byte = corrupt.len() - 5;
    corrupt[last_data_byte] ^= 0x01;
    let err = decode_dap(&corrupt, ChecksumMode::PerChunk).unwrap_err();
    assert_eq!(err.kind(), "ChecksumError");
}
