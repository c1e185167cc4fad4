//! DAP2 (legacy protocol) support.
//!
//! This crate parses and serializes the two DAP2 metadata documents (DDS
//! and DAS) and decodes the XDR payload of `.dods` responses into the
//! shared [`dap_model`] tree.

pub mod das;
pub mod dds;
pub mod dods;
pub mod lexer;
pub mod xdr;

pub use das::{apply_das, is_global_container, merge_das, parse_das, to_das};
pub use dds::{parse_dds, to_dds};
pub use dods::{decode_dods, split_dods, stream_sequence};
pub use xdr::{RecordStream, XdrReader};

use dap_model::{DapResult, Dataset};

/// Build a dataset from a DDS and (optionally) its DAS.
pub fn parse_dataset(dds: &str, das: Option<&str>) -> DapResult<Dataset> {
    let mut dataset = parse_dds(dds)?;
    if let Some(das) = das {
        merge_das(&mut dataset, das)?;
    }
    Ok(dataset)
}
