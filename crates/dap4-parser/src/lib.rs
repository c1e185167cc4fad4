//! DAP4 (structured protocol) support.
//!
//! Parses DMR documents into the shared [`dap_model`] tree and decodes the
//! chunked binary `.dap` responses: chunk framing with byte-order
//! detection, server error chunks, CRC32 verification and the element
//! layout of the data payload.

pub mod chunk;
pub mod decode;
pub mod dmr;

pub use chunk::{detect_framing, read_chunks, ByteOrder, ChunkHeader, ChunkedResponse};
pub use decode::{decode_variables, materialize, ChecksumMode, Dap4Reader, CHECKSUM_ATTRIBUTE};
pub use dmr::{parse_dmr, to_dmr};

use tracing::debug;

use dap_model::{DapResult, Dataset};

/// Decode a complete `.dap` response into a materialized dataset.
///
/// The DMR in the first chunk describes exactly what the payload holds,
/// which may be a subset of the full dataset when a constraint was applied.
pub fn decode_dap(response: &[u8], mode: ChecksumMode) -> DapResult<Dataset> {
    let chunks = read_chunks(response, mode == ChecksumMode::PerChunk)?;
    let mut dataset = parse_dmr(&chunks.dmr)?;
    let per_variable = mode.per_variable(&dataset);
    debug!(
        dataset = %dataset.name(),
        payload_bytes = chunks.payload.len(),
        ?mode,
        per_variable,
        "Decoding DAP4 payload"
    );
    materialize(&mut dataset, &chunks.payload, chunks.data_order, per_variable)?;
    Ok(dataset)
}
