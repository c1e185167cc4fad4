//! Materialized values: typed array columns and sequence records.

use bytes::Bytes;

use crate::dtype::DataType;

/// A single decoded element.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Opaque(Bytes),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::I8(v) => Some(*v as f64),
            Scalar::U8(v) => Some(*v as f64),
            Scalar::I16(v) => Some(*v as f64),
            Scalar::U16(v) => Some(*v as f64),
            Scalar::I32(v) => Some(*v as f64),
            Scalar::U32(v) => Some(*v as f64),
            Scalar::I64(v) => Some(*v as f64),
            Scalar::U64(v) => Some(*v as f64),
            Scalar::F32(v) => Some(*v as f64),
            Scalar::F64(v) => Some(*v),
            Scalar::Str(_) | Scalar::Opaque(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::I8(v) => Some(*v as i64),
            Scalar::U8(v) => Some(*v as i64),
            Scalar::I16(v) => Some(*v as i64),
            Scalar::U16(v) => Some(*v as i64),
            Scalar::I32(v) => Some(*v as i64),
            Scalar::U32(v) => Some(*v as i64),
            Scalar::I64(v) => Some(*v),
            Scalar::U64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// A homogeneous, row-major column of decoded elements.
///
/// The variant is chosen by storage type: `Byte`, `Char` and `UInt8` all
/// land in `U8`, `String` and `Url` in `Str`, enums in their base type.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Str(Vec<String>),
    Opaque(Vec<Bytes>),
}

impl ArrayData {
    /// Empty column with room for `capacity` elements of `dtype`.
    ///
    /// `dtype` must be a storage type (enums are resolved to their base
    /// type by the caller); an unresolved `Enum` falls back to `I64`.
    pub fn with_capacity(dtype: DataType, capacity: usize) -> Self {
        match dtype {
            DataType::Int8 => ArrayData::I8(Vec::with_capacity(capacity)),
            DataType::Byte | DataType::Char | DataType::UInt8 => ArrayData::U8(Vec::with_capacity(capacity)),
            DataType::Int16 => ArrayData::I16(Vec::with_capacity(capacity)),
            DataType::UInt16 => ArrayData::U16(Vec::with_capacity(capacity)),
            DataType::Int32 => ArrayData::I32(Vec::with_capacity(capacity)),
            DataType::UInt32 => ArrayData::U32(Vec::with_capacity(capacity)),
            DataType::Int64 | DataType::Enum => ArrayData::I64(Vec::with_capacity(capacity)),
            DataType::UInt64 => ArrayData::U64(Vec::with_capacity(capacity)),
            DataType::Float32 => ArrayData::F32(Vec::with_capacity(capacity)),
            DataType::Float64 => ArrayData::F64(Vec::with_capacity(capacity)),
            DataType::String | DataType::Url => ArrayData::Str(Vec::with_capacity(capacity)),
            DataType::Opaque => ArrayData::Opaque(Vec::with_capacity(capacity)),
        }
    }

    /// Storage type of the column (`Byte`/`Char` columns report `UInt8`).
    pub fn dtype(&self) -> DataType {
        match self {
            ArrayData::I8(_) => DataType::Int8,
            ArrayData::U8(_) => DataType::UInt8,
            ArrayData::I16(_) => DataType::Int16,
            ArrayData::U16(_) => DataType::UInt16,
            ArrayData::I32(_) => DataType::Int32,
            ArrayData::U32(_) => DataType::UInt32,
            ArrayData::I64(_) => DataType::Int64,
            ArrayData::U64(_) => DataType::UInt64,
            ArrayData::F32(_) => DataType::Float32,
            ArrayData::F64(_) => DataType::Float64,
            ArrayData::Str(_) => DataType::String,
            ArrayData::Opaque(_) => DataType::Opaque,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayData::I8(v) => v.len(),
            ArrayData::U8(v) => v.len(),
            ArrayData::I16(v) => v.len(),
            ArrayData::U16(v) => v.len(),
            ArrayData::I32(v) => v.len(),
            ArrayData::U32(v) => v.len(),
            ArrayData::I64(v) => v.len(),
            ArrayData::U64(v) => v.len(),
            ArrayData::F32(v) => v.len(),
            ArrayData::F64(v) => v.len(),
            ArrayData::Str(v) => v.len(),
            ArrayData::Opaque(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at flat (row-major) index `i`.
    pub fn get(&self, i: usize) -> Option<Scalar> {
        match self {
            ArrayData::I8(v) => v.get(i).map(|x| Scalar::I8(*x)),
            ArrayData::U8(v) => v.get(i).map(|x| Scalar::U8(*x)),
            ArrayData::I16(v) => v.get(i).map(|x| Scalar::I16(*x)),
            ArrayData::U16(v) => v.get(i).map(|x| Scalar::U16(*x)),
            ArrayData::I32(v) => v.get(i).map(|x| Scalar::I32(*x)),
            ArrayData::U32(v) => v.get(i).map(|x| Scalar::U32(*x)),
            ArrayData::I64(v) => v.get(i).map(|x| Scalar::I64(*x)),
            ArrayData::U64(v) => v.get(i).map(|x| Scalar::U64(*x)),
            ArrayData::F32(v) => v.get(i).map(|x| Scalar::F32(*x)),
            ArrayData::F64(v) => v.get(i).map(|x| Scalar::F64(*x)),
            ArrayData::Str(v) => v.get(i).map(|x| Scalar::Str(x.clone())),
            ArrayData::Opaque(v) => v.get(i).map(|x| Scalar::Opaque(x.clone())),
        }
    }

    /// Append a scalar of the matching variant. Returns `false` (and
    /// leaves the column untouched) on a variant mismatch.
    pub fn push(&mut self, value: Scalar) -> bool {
        match (self, value) {
            (ArrayData::I8(v), Scalar::I8(x)) => v.push(x),
            (ArrayData::U8(v), Scalar::U8(x)) => v.push(x),
            (ArrayData::I16(v), Scalar::I16(x)) => v.push(x),
            (ArrayData::U16(v), Scalar::U16(x)) => v.push(x),
            (ArrayData::I32(v), Scalar::I32(x)) => v.push(x),
            (ArrayData::U32(v), Scalar::U32(x)) => v.push(x),
            (ArrayData::I64(v), Scalar::I64(x)) => v.push(x),
            (ArrayData::U64(v), Scalar::U64(x)) => v.push(x),
            (ArrayData::F32(v), Scalar::F32(x)) => v.push(x),
            (ArrayData::F64(v), Scalar::F64(x)) => v.push(x),
            (ArrayData::Str(v), Scalar::Str(x)) => v.push(x),
            (ArrayData::Opaque(v), Scalar::Opaque(x)) => v.push(x),
            _ => return false,
        }
        true
    }

    /// Append every element of `other`. Returns `false` on a variant mismatch.
    pub fn extend(&mut self, other: ArrayData) -> bool {
        match (self, other) {
            (ArrayData::I8(v), ArrayData::I8(x)) => v.extend(x),
            (ArrayData::U8(v), ArrayData::U8(x)) => v.extend(x),
            (ArrayData::I16(v), ArrayData::I16(x)) => v.extend(x),
            (ArrayData::U16(v), ArrayData::U16(x)) => v.extend(x),
            (ArrayData::I32(v), ArrayData::I32(x)) => v.extend(x),
            (ArrayData::U32(v), ArrayData::U32(x)) => v.extend(x),
            (ArrayData::I64(v), ArrayData::I64(x)) => v.extend(x),
            (ArrayData::U64(v), ArrayData::U64(x)) => v.extend(x),
            (ArrayData::F32(v), ArrayData::F32(x)) => v.extend(x),
            (ArrayData::F64(v), ArrayData::F64(x)) => v.extend(x),
            (ArrayData::Str(v), ArrayData::Str(x)) => v.extend(x),
            (ArrayData::Opaque(v), ArrayData::Opaque(x)) => v.extend(x),
            _ => return false,
        }
        true
    }

    /// Convert numeric columns to `f64`, `None` for text and opaque data.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        (0..self.len())
            .map(|i| self.get(i).and_then(|s| s.as_f64()))
            .collect()
    }
}

/// One field of a sequence record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    /// A dimensioned field (DAP4 sequences may hold arrays).
    Array(ArrayData),
    /// A structure field, one value per member.
    Structure(Vec<Value>),
    /// A nested sequence: zero or more inner records for this outer record.
    Sequence(Vec<Record>),
}

impl Value {
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Value::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_records(&self) -> Option<&[Record]> {
        match self {
            Value::Sequence(r) => Some(r),
            _ => None,
        }
    }
}

/// One row of a sequence: a value per child, in declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record(pub Vec<Value>);

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Value> {
        self.0.get(i)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Scalar field `i`, the common case for flat sequences.
    pub fn scalar(&self, i: usize) -> Option<&Scalar> {
        self.0.get(i).and_then(Value::as_scalar)
    }
}

/// The decoded payload of one variable, as produced by either decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableData {
    Array(ArrayData),
    Records(Vec<Record>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_variants() {
        assert!(matches!(ArrayData::with_capacity(DataType::Byte, 0), ArrayData::U8(_)));
        assert!(matches!(ArrayData::with_capacity(DataType::Url, 0), ArrayData::Str(_)));
        assert!(matches!(ArrayData::with_capacity(DataType::Int64, 0), ArrayData::I64(_)));
    }

    #[test]
    fn test_push_rejects_mismatch() {
        let mut col = ArrayData::with_capacity(DataType::Int32, 2);
        assert!(col.push(Scalar::I32(4)));
        assert!(!col.push(Scalar::F32(1.0)));
        assert_eq!(col.len(), 1);
        assert_eq!(col.get(0), Some(Scalar::I32(4)));
        assert_eq!(col.get(1), None);
    }

    #[test]
    fn test_to_f64() {
        let col = ArrayData::I16(vec![1, -2]);
        assert_eq!(col.to_f64_vec(), Some(vec![1.0, -2.0]));
        let col = ArrayData::Str(vec!["a".into()]);
        assert_eq!(col.to_f64_vec(), None);
    }

    #[test]
    fn test_record_access() {
        let rec = Record::new(vec![Value::Scalar(Scalar::I32(1)), Value::Scalar(Scalar::I16(10))]);
        assert_eq!(rec.len(), 2);
        assert_eq!(rec.scalar(1).and_then(Scalar::as_i64), Some(10));
    }
}
