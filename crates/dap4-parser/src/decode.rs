//! DAP4 element decoding.
//!
//! Variables appear in DMR declaration order, group contents inline.
//! Fixed-width atomics are packed without padding; `String`, `URL` and
//! `Opaque` elements carry a 64-bit byte count; a sequence starts with a
//! 64-bit record count. With per-variable checksums each top-level variable
//! is followed by the CRC32 of its bytes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use dap_model::{
    ArrayData, DapError, DapResult, DataType, Dataset, Group, Leaf, Node, Record, Scalar, Sequence,
    Value, Variable, VariableData,
};

use crate::chunk::ByteOrder;

/// Attribute a DMR carries when the server appends per-variable checksums.
pub const CHECKSUM_ATTRIBUTE: &str = "_DAP4_Checksum_CRC32";

/// Which checksums to verify while decoding a `.dap` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumMode {
    /// No checksums in the stream.
    None,
    /// A CRC32 follows every top-level variable.
    PerVariable,
    /// Every data chunk body ends in a CRC32.
    PerChunk,
    /// Per-variable checksums when the DMR announces them, none otherwise.
    #[default]
    Auto,
}

impl ChecksumMode {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" | "off" | "false" => Some(Self::None),
            "pervariable" | "variable" => Some(Self::PerVariable),
            "perchunk" | "chunk" => Some(Self::PerChunk),
            "auto" | "true" | "on" => Some(Self::Auto),
            _ => None,
        }
    }

    /// Whether per-variable CRCs are present for `dataset`.
    pub fn per_variable(&self, dataset: &Dataset) -> bool {
        match self {
            ChecksumMode::PerVariable => true,
            ChecksumMode::Auto => announces_checksums(dataset),
            ChecksumMode::None | ChecksumMode::PerChunk => false,
        }
    }
}

fn announces_checksums(dataset: &Dataset) -> bool {
    dataset.attributes().contains(CHECKSUM_ATTRIBUTE)
        || dataset
            .walk()
            .iter()
            .any(|v| v.attributes().contains(CHECKSUM_ATTRIBUTE))
}

/// Cursor over a de-chunked DAP4 payload.
pub struct Dap4Reader<'a> {
    data: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

macro_rules! read_fixed {
    ($($name:ident: $ty:ty => $n:expr),* $(,)?) => {
        $(
            fn $name(&mut self, what: &str) -> DapResult<$ty> {
                let b = self.take($n, what)?;
                let mut raw = [0u8; $n];
                raw.copy_from_slice(b);
                Ok(match self.order {
                    ByteOrder::Big => <$ty>::from_be_bytes(raw),
                    ByteOrder::Little => <$ty>::from_le_bytes(raw),
                })
            }
        )*
    };
}

impl<'a> Dap4Reader<'a> {
    pub fn new(data: &'a [u8], order: ByteOrder) -> Self {
        Self { data, pos: 0, order }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Fail if bytes are left over after the last declared variable.
    pub fn finish(&self) -> DapResult<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DapError::protocol(format!(
                "{} unexpected trailing bytes after the last variable",
                n
            ))),
        }
    }

    fn take(&mut self, n: usize, what: &str) -> DapResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(DapError::protocol(format!(
                "DAP4 payload truncated while reading '{}': needed {} bytes at offset {}, {} left",
                what,
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    read_fixed!(
        read_i16: i16 => 2,
        read_u16: u16 => 2,
        read_i32: i32 => 4,
        read_u32: u32 => 4,
        read_i64: i64 => 8,
        read_u64: u64 => 8,
        read_f32: f32 => 4,
        read_f64: f64 => 8,
    );

    fn read_count(&mut self, what: &str) -> DapResult<usize> {
        let count = self.read_u64(what)?;
        usize::try_from(count)
            .ok()
            .filter(|n| *n <= self.remaining())
            .ok_or_else(|| {
                DapError::protocol(format!(
                    "count {} for '{}' exceeds the {} bytes left in the payload",
                    count,
                    what,
                    self.remaining()
                ))
            })
    }

    fn read_scalar(&mut self, dtype: DataType, what: &str) -> DapResult<Scalar> {
        let scalar = match dtype {
            DataType::Byte | DataType::Char | DataType::UInt8 => Scalar::U8(self.take(1, what)?[0]),
            DataType::Int8 => Scalar::I8(self.take(1, what)?[0] as i8),
            DataType::Int16 => Scalar::I16(self.read_i16(what)?),
            DataType::UInt16 => Scalar::U16(self.read_u16(what)?),
            DataType::Int32 => Scalar::I32(self.read_i32(what)?),
            DataType::UInt32 => Scalar::U32(self.read_u32(what)?),
            DataType::Int64 => Scalar::I64(self.read_i64(what)?),
            DataType::UInt64 => Scalar::U64(self.read_u64(what)?),
            DataType::Float32 => Scalar::F32(self.read_f32(what)?),
            DataType::Float64 => Scalar::F64(self.read_f64(what)?),
            DataType::String | DataType::Url => {
                let n = self.read_count(what)?;
                Scalar::Str(String::from_utf8_lossy(self.take(n, what)?).into_owned())
            }
            DataType::Opaque => {
                let n = self.read_count(what)?;
                Scalar::Opaque(Bytes::copy_from_slice(self.take(n, what)?))
            }
            DataType::Enum => {
                return Err(DapError::protocol(format!(
                    "'{}' has an unresolved enumeration type",
                    what
                )))
            }
        };
        Ok(scalar)
    }

    /// Decode every element of `leaf` as declared.
    pub fn read_leaf(&mut self, leaf: &Leaf) -> DapResult<ArrayData> {
        let dtype = leaf.storage_type();
        let what = leaf.fqn();
        let count = leaf.size();

        // Variable-width elements carry at least their 8-byte count.
        let width = dtype.fixed_size().unwrap_or(8);
        let needed = count.checked_mul(width).unwrap_or(usize::MAX);
        if needed > self.remaining() {
            return Err(DapError::protocol(format!(
                "DAP4 payload truncated in '{}': {} elements need at least {} bytes, {} left",
                what,
                count,
                needed,
                self.remaining()
            )));
        }

        let mut out = ArrayData::with_capacity(dtype, count);
        for _ in 0..count {
            let scalar = self.read_scalar(dtype, what)?;
            if !out.push(scalar) {
                return Err(DapError::model(format!("decoded value for '{}' has the wrong type", what)));
            }
        }
        Ok(out)
    }

    /// All records of `sequence`, prefixed by their count.
    pub fn read_sequence(&mut self, sequence: &Sequence) -> DapResult<Vec<Record>> {
        let count = self.read_count(sequence.fqn())?;
        let mut records = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let values = sequence
                .columns()
                .iter()
                .map(|column| self.read_value(column))
                .collect::<DapResult<Vec<_>>>()?;
            records.push(Record::new(values));
        }
        Ok(records)
    }

    fn read_value(&mut self, node: &Node) -> DapResult<Value> {
        match node {
            Node::Leaf(leaf) if leaf.is_scalar() => {
                let scalar = self.read_scalar(leaf.storage_type(), leaf.fqn())?;
                Ok(Value::Scalar(scalar))
            }
            Node::Leaf(leaf) => Ok(Value::Array(self.read_leaf(leaf)?)),
            Node::Structure(s) => {
                reject_structure_array(s.fqn(), s.dims().len())?;
                Ok(Value::Structure(
                    s.members()
                        .iter()
                        .map(|m| self.read_value(m))
                        .collect::<DapResult<Vec<_>>>()?,
                ))
            }
            Node::Sequence(s) => Ok(Value::Sequence(self.read_sequence(s)?)),
            Node::Grid(g) => Err(DapError::protocol(format!(
                "grid '{}' cannot appear in a DAP4 payload",
                g.fqn()
            ))),
            Node::Group(g) => Err(DapError::protocol(format!(
                "group '{}' cannot be nested inside a variable",
                g.fqn()
            ))),
        }
    }

    /// Decode `node` and append the data of its leaves and sequences to `out`.
    pub fn read_node(&mut self, node: &Node, out: &mut Vec<(String, VariableData)>) -> DapResult<()> {
        match node {
            Node::Leaf(leaf) => {
                out.push((leaf.fqn().to_string(), VariableData::Array(self.read_leaf(leaf)?)));
            }
            Node::Structure(s) => {
                reject_structure_array(s.fqn(), s.dims().len())?;
                for member in s.members() {
                    self.read_node(member, out)?;
                }
            }
            Node::Sequence(s) => {
                out.push((s.fqn().to_string(), VariableData::Records(self.read_sequence(s)?)));
            }
            Node::Grid(g) => {
                return Err(DapError::protocol(format!(
                    "grid '{}' cannot appear in a DAP4 payload",
                    g.fqn()
                )))
            }
            Node::Group(g) => {
                return Err(DapError::protocol(format!(
                    "group '{}' cannot be nested inside a variable",
                    g.fqn()
                )))
            }
        }
        Ok(())
    }

    /// Check the CRC32 that follows a variable spanning `start..position()`.
    fn verify_checksum(&mut self, start: usize, variable: &str) -> DapResult<()> {
        let actual = crc32fast::hash(&self.data[start..self.pos]);
        let expected = self.read_u32(&format!("{} checksum", variable))?;
        if expected != actual {
            return Err(DapError::Checksum {
                variable: variable.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}

fn reject_structure_array(fqn: &str, rank: usize) -> DapResult<()> {
    if rank > 0 {
        return Err(DapError::protocol(format!(
            "'{}' is an array of structures, which is not supported",
            fqn
        )));
    }
    Ok(())
}

fn decode_group(
    reader: &mut Dap4Reader<'_>,
    group: &Group,
    checksums: bool,
    out: &mut Vec<(String, VariableData)>,
) -> DapResult<()> {
    for node in group.members() {
        if let Node::Group(inner) = node {
            decode_group(reader, inner, checksums, out)?;
            continue;
        }
        let start = reader.position();
        reader.read_node(node, out)?;
        if checksums {
            reader.verify_checksum(start, node.fqn())?;
        }
    }
    Ok(())
}

/// Decode a payload laid out as `dataset` describes.
///
/// `dataset` must describe exactly the variables present in the payload
/// (for `.dap` responses: the DMR of the first chunk).
pub fn decode_variables(
    dataset: &Dataset,
    payload: &[u8],
    order: ByteOrder,
    checksums: bool,
) -> DapResult<Vec<(String, VariableData)>> {
    let mut reader = Dap4Reader::new(payload, order);
    let mut out = Vec::new();
    decode_group(&mut reader, dataset.root(), checksums, &mut out)?;
    reader.finish()?;
    debug!(variables = out.len(), bytes = payload.len(), "Decoded DAP4 payload");
    Ok(out)
}

/// Decode a payload and store the data on the matching nodes of `dataset`.
pub fn materialize(dataset: &mut Dataset, payload: &[u8], order: ByteOrder, checksums: bool) -> DapResult<()> {
    let decoded = decode_variables(dataset, payload, order, checksums)?;
    for (fqn, data) in decoded {
        dataset.set_variable_data(&fqn, data)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dap_model::{Dim, Protocol, Structure};
    use test_utils::Dap4Writer;

    fn dataset(nodes: Vec<Node>) -> Dataset {
        let mut root = Group::new("d");
        for node in nodes {
            root.add(node).unwrap();
        }
        Dataset::new(Protocol::Dap4, root).unwrap()
    }

    fn leaf(name: &str, dtype: DataType, n: Option<usize>) -> Node {
        let dims = n.map(|n| vec![Dim::anonymous(n)]).unwrap_or_default();
        Leaf::new(name, dtype, dims).into()
    }

    #[test]
    fn test_fixed_width_both_orders() {
        let ds = dataset(vec![leaf("v", DataType::Int16, Some(3)), leaf("f", DataType::Float64, None)]);
        for little in [false, true] {
            let mut w = Dap4Writer::new(little);
            w.i16(1).i16(-2).i16(3).f64(0.5);
            let order = if little { ByteOrder::Little } else { ByteOrder::Big };
            let out = decode_variables(&ds, &w.into_bytes(), order, false).unwrap();
            assert_eq!(out[0].1, VariableData::Array(ArrayData::I16(vec![1, -2, 3])));
            assert_eq!(out[1].1, VariableData::Array(ArrayData::F64(vec![0.5])));
        }
    }

    #[test]
    fn test_strings_and_opaque_use_u64_counts() {
        let ds = dataset(vec![leaf("s", DataType::String, Some(2)), leaf("o", DataType::Opaque, None)]);
        let mut w = Dap4Writer::new(false);
        w.string("ab").string("").opaque(&[1, 2, 3]);
        let out = decode_variables(&ds, &w.into_bytes(), ByteOrder::Big, false).unwrap();
        assert_eq!(out[0].1, VariableData::Array(ArrayData::Str(vec!["ab".into(), String::new()])));
        assert_eq!(
            out[1].1,
            VariableData::Array(ArrayData::Opaque(vec![Bytes::from_static(&[1, 2, 3])]))
        );
    }

    #[test]
    fn test_sequence_record_count() {
        let mut seq = Sequence::new("obs");
        seq.add(leaf("id", DataType::Int32, None)).unwrap();
        seq.add(leaf("tag", DataType::String, None)).unwrap();
        let ds = dataset(vec![seq.into()]);
        let mut w = Dap4Writer::new(true);
        w.record_count(2).i32(1).string("a").i32(2).string("b");
        let out = decode_variables(&ds, &w.into_bytes(), ByteOrder::Little, false).unwrap();
        let VariableData::Records(records) = &out[0].1 else {
            panic!("expected records");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].scalar(1), Some(&Scalar::Str("b".into())));
    }

    #[test]
    fn test_structure_members_decoded_in_order() {
        let mut s = Structure::new("point");
        s.add(leaf("lon", DataType::Float32, None)).unwrap();
        s.add(leaf("lat", DataType::Float32, None)).unwrap();
        let ds = dataset(vec![s.into()]);
        let mut w = Dap4Writer::new(false);
        w.f32(10.0).f32(20.0);
        let out = decode_variables(&ds, &w.into_bytes(), ByteOrder::Big, false).unwrap();
        assert_eq!(out[0].0, "/point.lon");
        assert_eq!(out[1].0, "/point.lat");
    }

    #[test]
    fn test_per_variable_checksum() {
        let ds = dataset(vec![leaf("v", DataType::Int32, Some(2))]);
        let mut w = Dap4Writer::new(false);
        w.begin_variable().i32(5).i32(6).end_variable_with_checksum();
        let mut bytes = w.into_bytes();
        decode_variables(&ds, &bytes, ByteOrder::Big, true).unwrap();

        bytes[3] ^= 0x01;
        let err = decode_variables(&ds, &bytes, ByteOrder::Big, true).unwrap_err();
        assert!(matches!(err, DapError::Checksum { ref variable, .. } if variable == "/v"));
    }

    #[test]
    fn test_short_payload_is_protocol_error() {
        let ds = dataset(vec![leaf("v", DataType::Int32, Some(4))]);
        let mut w = Dap4Writer::new(false);
        w.i32(1).i32(2);
        let err = decode_variables(&ds, &w.into_bytes(), ByteOrder::Big, false).unwrap_err();
        assert!(matches!(err, DapError::Protocol(_)));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let ds = dataset(vec![leaf("v", DataType::UInt8, None)]);
        let err = decode_variables(&ds, &[1, 2], ByteOrder::Big, false).unwrap_err();
        assert!(err.to_string().contains("trailing"));
    }

    #[test]
    fn test_huge_string_count_rejected() {
        let ds = dataset(vec![leaf("s", DataType::String, None)]);
        let mut w = Dap4Writer::new(false);
        w.u64(u64::MAX);
        assert!(decode_variables(&ds, &w.into_bytes(), ByteOrder::Big, false).is_err());
    }

    #[test]
    fn test_huge_string_array_rejected_before_allocation() {
        let ds = dataset(vec![leaf("s", DataType::String, Some(1_000_000_000_000))]);
        let mut w = Dap4Writer::new(false);
        w.string("");
        let err = decode_variables(&ds, &w.into_bytes(), ByteOrder::Big, false).unwrap_err();
        assert!(matches!(err, DapError::Protocol(_)));
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_checksum_mode_from_str() {
        assert_eq!(ChecksumMode::from_str("per-chunk"), Some(ChecksumMode::PerChunk));
        assert_eq!(ChecksumMode::from_str("PerVariable"), Some(ChecksumMode::PerVariable));
        assert_eq!(ChecksumMode::from_str("nope"), None);
    }
}
