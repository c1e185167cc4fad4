//! DODS responses: a DDS, a `Data:` marker line and the XDR payload.

use bytes::Bytes;
use tracing::debug;

use dap_model::{DapError, DapResult, Dataset, Node, Variable};

use crate::dds::parse_dds;
use crate::xdr::{self, RecordStream, XdrReader};

const MARKERS: [&[u8]; 2] = [b"\nData:\n", b"\nData:\r\n"];

/// Byte offsets of the end of the DDS and the start of the payload.
fn locate_payload(response: &[u8]) -> DapResult<(usize, usize)> {
    let found = MARKERS
        .iter()
        .filter_map(|marker| {
            response
                .windows(marker.len())
                .position(|w| w == *marker)
                .map(|i| (i + 1, i + marker.len()))
        })
        .min();

    match found {
        Some(offsets) => Ok(offsets),
        None => Err(server_error(response)
            .unwrap_or_else(|| DapError::protocol("DODS response has no 'Data:' marker"))),
    }
}

/// DAP2 servers report failures as a textual `Error { ... };` body.
fn server_error(response: &[u8]) -> Option<DapError> {
    let text = std::str::from_utf8(response).ok()?.trim_start();
    if text.starts_with("Error") && text.contains('{') {
        Some(DapError::protocol(format!("server error: {}", text.trim_end())))
    } else {
        None
    }
}

/// Split a DODS response into its DDS text and its XDR payload.
pub fn split_dods(response: &[u8]) -> DapResult<(&str, &[u8])> {
    let (dds_end, payload_start) = locate_payload(response)?;
    let dds = std::str::from_utf8(&response[..dds_end])
        .map_err(|e| DapError::parse(format!("DDS section is not valid UTF-8: {}", e)))?;
    Ok((dds, &response[payload_start..]))
}

/// Decode a complete DODS response into a materialized dataset.
///
/// The embedded DDS describes exactly what the payload holds, which may be
/// a subset of the full dataset when a constraint was applied.
pub fn decode_dods(response: &[u8]) -> DapResult<Dataset> {
    let (dds, payload) = split_dods(response)?;
    let mut dataset = parse_dds(dds)?;
    debug!(
        dataset = %dataset.name(),
        payload_bytes = payload.len(),
        "Decoding DODS payload"
    );
    xdr::materialize(&mut dataset, payload)?;
    Ok(dataset)
}

/// Stream the records of the top-level sequence `fqn` out of a DODS
/// response without decoding them all up front.
///
/// Variables that precede the sequence in the payload are decoded and
/// discarded.
pub fn stream_sequence(response: Bytes, fqn: &str) -> DapResult<RecordStream> {
    let (dds, payload) = split_dods(&response)?;
    let dataset = parse_dds(dds)?;
    let payload_start = response.len() - payload.len();

    let mut reader = XdrReader::new(payload);
    for node in dataset.children() {
        if node.fqn() == fqn {
            return match node {
                Node::Sequence(sequence) => Ok(RecordStream::new(
                    response.slice(payload_start..),
                    reader.position(),
                    sequence.clone(),
                )),
                _ => Err(DapError::protocol(format!("'{}' is not a sequence", fqn))),
            };
        }
        let mut skipped = Vec::new();
        reader.read_node(node, &mut skipped)?;
    }

    Err(DapError::protocol(format!(
        "DODS response does not contain a top-level sequence '{}'",
        fqn
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split() {
        let mut response = b"Dataset {\n    Int32 x;\n} d;\nData:\n".to_vec();
        response.extend_from_slice(&7u32.to_be_bytes());
        let (dds, payload) = split_dods(&response).unwrap();
        assert!(dds.ends_with("} d;\n"));
        assert_eq!(payload, &7u32.to_be_bytes());
    }

    #[test]
    fn test_crlf_marker() {
        let mut response = b"Dataset { Int32 x; } d;\r\nData:\r\n".to_vec();
        response.extend_from_slice(&7u32.to_be_bytes());
        let ds = decode_dods(&response).unwrap();
        assert_eq!(ds.leaf("x").unwrap().data().and_then(|d| d.get(0)).and_then(|s| s.as_i64()), Some(7));
    }

    #[test]
    fn test_server_error_body() {
        let body = b"Error {\n    code = 1005;\n    message = \"No such variable\";\n};\n";
        let err = decode_dods(body).unwrap_err();
        assert!(matches!(err, DapError::Protocol(ref m) if m.contains("No such variable")));
    }

    #[test]
    fn test_missing_marker() {
        assert!(matches!(split_dods(b"garbage"), Err(DapError::Protocol(_))));
    }
}
