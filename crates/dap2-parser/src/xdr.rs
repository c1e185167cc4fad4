//! XDR decoding of DODS payloads.
//!
//! Layout (big-endian, 4-byte aligned):
//! - `Byte`, `Int16` and `UInt16` scalars are widened to a 4-byte word
//! - arrays start with the element count written twice; both copies must
//!   agree and must match the declared shape
//! - `String`/`Url` arrays carry a single count word
//! - `Byte` arrays are packed and padded to a 4-byte boundary
//! - strings are a 4-byte length, the bytes and padding
//! - every sequence record is preceded by a marker word whose first byte
//!   is [`START_OF_INSTANCE`]; [`END_OF_SEQUENCE`] closes the sequence

use bytes::Bytes;

use dap_model::{
    ArrayData, DapError, DapResult, DataType, Dataset, Leaf, Node, Record, Scalar, Sequence,
    Value, Variable, VariableData,
};

/// Marker byte announcing another sequence record.
pub const START_OF_INSTANCE: u8 = 0x5A;

/// Marker byte closing a sequence.
pub const END_OF_SEQUENCE: u8 = 0xA5;

fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Smallest number of bytes one array element occupies on the wire.
/// Strings and opaques carry at least their 4-byte length word.
fn min_wire_width(dtype: DataType) -> usize {
    match dtype {
        DataType::Byte | DataType::UInt8 | DataType::Char | DataType::Int8 => 1,
        DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
        _ => 4,
    }
}

/// Cursor over an XDR byte stream.
pub struct XdrReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> XdrReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Resume reading at byte `pos`.
    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
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
                "XDR stream truncated while reading '{}': needed {} bytes at offset {}, {} left",
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

    fn read_u32(&mut self, what: &str) -> DapResult<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self, what: &str) -> DapResult<u64> {
        let b = self.take(8, what)?;
        Ok(u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    /// Length-prefixed bytes followed by padding.
    fn read_counted(&mut self, what: &str) -> DapResult<&'a [u8]> {
        let len = self.read_u32(what)? as usize;
        let bytes = self.take(len, what)?;
        self.take(padding(len), what)?;
        Ok(bytes)
    }

    fn read_scalar(&mut self, dtype: DataType, what: &str) -> DapResult<Scalar> {
        let scalar = match dtype {
            DataType::Byte | DataType::UInt8 | DataType::Char => Scalar::U8(self.read_u32(what)? as u8),
            DataType::Int8 => Scalar::I8(self.read_u32(what)? as i32 as i8),
            DataType::Int16 => Scalar::I16(self.read_u32(what)? as i32 as i16),
            DataType::UInt16 => Scalar::U16(self.read_u32(what)? as u16),
            DataType::Int32 => Scalar::I32(self.read_u32(what)? as i32),
            DataType::UInt32 => Scalar::U32(self.read_u32(what)?),
            DataType::Int64 => Scalar::I64(self.read_u64(what)? as i64),
            DataType::UInt64 => Scalar::U64(self.read_u64(what)?),
            DataType::Float32 => Scalar::F32(f32::from_bits(self.read_u32(what)?)),
            DataType::Float64 => Scalar::F64(f64::from_bits(self.read_u64(what)?)),
            DataType::String | DataType::Url => {
                Scalar::Str(String::from_utf8_lossy(self.read_counted(what)?).into_owned())
            }
            DataType::Opaque => Scalar::Opaque(Bytes::copy_from_slice(self.read_counted(what)?)),
            DataType::Enum => {
                return Err(DapError::protocol(format!(
                    "'{}' is an enumeration, which XDR cannot carry",
                    what
                )))
            }
        };
        Ok(scalar)
    }

    /// Decode one leaf (scalar or array) as declared.
    pub fn read_leaf(&mut self, leaf: &Leaf) -> DapResult<ArrayData> {
        let dtype = leaf.storage_type();
        let what = leaf.fqn();

        if leaf.is_scalar() {
            let mut out = ArrayData::with_capacity(dtype, 1);
            let scalar = self.read_scalar(dtype, what)?;
            push_checked(&mut out, scalar, what)?;
            return Ok(out);
        }

        let count = self.read_u32(what)? as usize;
        if !dtype.is_text() {
            let again = self.read_u32(what)? as usize;
            if again != count {
                return Err(DapError::protocol(format!(
                    "corrupt array header for '{}': length words disagree ({} vs {})",
                    what, count, again
                )));
            }
        }
        let expected = leaf.size();
        if count != expected {
            return Err(DapError::ShapeMismatch {
                variable: what.to_string(),
                expected,
                actual: count,
            });
        }
        let needed = count.saturating_mul(min_wire_width(dtype));
        if needed > self.remaining() {
            return Err(DapError::protocol(format!(
                "XDR stream truncated while reading '{}': {} elements need at least {} bytes, {} left",
                what,
                count,
                needed,
                self.remaining()
            )));
        }

        match dtype {
            DataType::Byte | DataType::UInt8 | DataType::Char => {
                let bytes = self.take(count, what)?.to_vec();
                self.take(padding(count), what)?;
                Ok(ArrayData::U8(bytes))
            }
            DataType::Int8 => {
                let bytes: Vec<i8> = self.take(count, what)?.iter().map(|b| *b as i8).collect();
                self.take(padding(count), what)?;
                Ok(ArrayData::I8(bytes))
            }
            _ => {
                let mut out = ArrayData::with_capacity(dtype, count);
                for _ in 0..count {
                    let scalar = self.read_scalar(dtype, what)?;
                    push_checked(&mut out, scalar, what)?;
                }
                Ok(out)
            }
        }
    }

    /// The next record of `sequence`, or `None` at the end marker.
    pub fn read_record(&mut self, sequence: &Sequence) -> DapResult<Option<Record>> {
        let marker = self.read_u32(sequence.fqn())?;
        match (marker >> 24) as u8 {
            START_OF_INSTANCE => {
                let values = sequence
                    .columns()
                    .iter()
                    .map(|column| self.read_value(column))
                    .collect::<DapResult<Vec<_>>>()?;
                Ok(Some(Record::new(values)))
            }
            END_OF_SEQUENCE => Ok(None),
            other => Err(DapError::protocol(format!(
                "invalid sequence marker 0x{:02x} in '{}' at offset {}",
                other,
                sequence.fqn(),
                self.pos - 4
            ))),
        }
    }

    /// Every remaining record of `sequence`, consuming the end marker.
    pub fn read_records(&mut self, sequence: &Sequence) -> DapResult<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = self.read_record(sequence)? {
            records.push(record);
        }
        Ok(records)
    }

    fn read_value(&mut self, node: &Node) -> DapResult<Value> {
        match node {
            Node::Leaf(leaf) if leaf.is_scalar() => {
                let data = self.read_leaf(leaf)?;
                data.get(0)
                    .map(Value::Scalar)
                    .ok_or_else(|| DapError::protocol(format!("no value decoded for '{}'", leaf.fqn())))
            }
            Node::Leaf(leaf) => Ok(Value::Array(self.read_leaf(leaf)?)),
            Node::Structure(s) => Ok(Value::Structure(
                s.members()
                    .iter()
                    .map(|m| self.read_value(m))
                    .collect::<DapResult<Vec<_>>>()?,
            )),
            Node::Sequence(s) => Ok(Value::Sequence(self.read_records(s)?)),
            Node::Grid(g) => {
                let mut values = vec![Value::Array(self.read_leaf(g.array())?)];
                for map in g.maps() {
                    values.push(Value::Array(self.read_leaf(map)?));
                }
                Ok(Value::Structure(values))
            }
            Node::Group(g) => Err(DapError::protocol(format!(
                "group '{}' cannot appear in a DAP2 payload",
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
                for member in s.members() {
                    self.read_node(member, out)?;
                }
            }
            Node::Grid(g) => {
                out.push((g.array().fqn().to_string(), VariableData::Array(self.read_leaf(g.array())?)));
                for map in g.maps() {
                    out.push((map.fqn().to_string(), VariableData::Array(self.read_leaf(map)?)));
                }
            }
            Node::Sequence(s) => {
                out.push((s.fqn().to_string(), VariableData::Records(self.read_records(s)?)));
            }
            Node::Group(g) => {
                return Err(DapError::protocol(format!(
                    "group '{}' cannot appear in a DAP2 payload",
                    g.fqn()
                )))
            }
        }
        Ok(())
    }
}

fn push_checked(out: &mut ArrayData, scalar: Scalar, what: &str) -> DapResult<()> {
    if out.push(scalar) {
        Ok(())
    } else {
        Err(DapError::model(format!("decoded value for '{}' has the wrong type", what)))
    }
}

/// Decode a payload laid out as `dataset` describes, in declaration order.
///
/// `dataset` must describe exactly the variables present in the payload
/// (for DODS responses: the DDS that precedes the data).
pub fn decode_variables(dataset: &Dataset, payload: &[u8]) -> DapResult<Vec<(String, VariableData)>> {
    let mut reader = XdrReader::new(payload);
    let mut out = Vec::new();
    for node in dataset.children() {
        reader.read_node(node, &mut out)?;
    }
    reader.finish()?;
    Ok(out)
}

/// Decode a payload and store the data on the matching nodes of `dataset`.
pub fn materialize(dataset: &mut Dataset, payload: &[u8]) -> DapResult<()> {
    let decoded = decode_variables(dataset, payload)?;
    for (fqn, data) in decoded {
        dataset.set_variable_data(&fqn, data)?;
    }
    Ok(())
}

/// Lazily decodes the records of one sequence, one record per `next()`.
///
/// The stream owns the response bytes, so records can be consumed after
/// the fetch that produced them has finished. It is single-pass: once it
/// has yielded the end of the sequence or an error it stays exhausted.
pub struct RecordStream {
    data: Bytes,
    pos: usize,
    sequence: Sequence,
    done: bool,
}

impl RecordStream {
    /// Stream the records of `sequence` starting at byte `pos` of `data`.
    pub fn new(data: Bytes, pos: usize, sequence: Sequence) -> Self {
        Self {
            data,
            pos,
            sequence,
            done: false,
        }
    }

    /// The sequence whose records are being decoded.
    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    /// Byte offset of the next record marker.
    pub fn offset(&self) -> usize {
        self.pos
    }
}

impl Iterator for RecordStream {
    type Item = DapResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut reader = XdrReader::at(&self.data, self.pos);
        match reader.read_record(&self.sequence) {
            Ok(Some(record)) => {
                self.pos = reader.position();
                Some(Ok(record))
            }
            Ok(None) => {
                self.pos = reader.position();
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for RecordStream {}
