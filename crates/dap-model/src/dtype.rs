//! Atomic data types shared by the DAP2 and DAP4 type systems.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which wire protocol produced (and will decode) a dataset tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// DDS/DAS/DODS
    #[default]
    Dap2,
    /// DMR/DAP
    Dap4,
}

impl Protocol {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dap2" | "2" => Some(Self::Dap2),
            "dap4" | "4" => Some(Self::Dap4),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dap2 => "dap2",
            Self::Dap4 => "dap4",
        }
    }
}

/// Atomic element type of a leaf variable or attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Byte,
    Char,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    String,
    Url,
    Opaque,
    Enum,
}

impl DataType {
    const ALL: [DataType; 16] = [
        DataType::Byte,
        DataType::Char,
        DataType::Int8,
        DataType::UInt8,
        DataType::Int16,
        DataType::UInt16,
        DataType::Int32,
        DataType::UInt32,
        DataType::Int64,
        DataType::UInt64,
        DataType::Float32,
        DataType::Float64,
        DataType::String,
        DataType::Url,
        DataType::Opaque,
        DataType::Enum,
    ];

    /// Element tag used in DMR documents.
    pub fn dap4_name(&self) -> &'static str {
        match self {
            DataType::Byte => "Byte",
            DataType::Char => "Char",
            DataType::Int8 => "Int8",
            DataType::UInt8 => "UInt8",
            DataType::Int16 => "Int16",
            DataType::UInt16 => "UInt16",
            DataType::Int32 => "Int32",
            DataType::UInt32 => "UInt32",
            DataType::Int64 => "Int64",
            DataType::UInt64 => "UInt64",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
            DataType::String => "String",
            DataType::Url => "URL",
            DataType::Opaque => "Opaque",
            DataType::Enum => "Enum",
        }
    }

    /// Keyword used in DDS/DAS documents, `None` for types the legacy
    /// grammar cannot express.
    pub fn dap2_name(&self) -> Option<&'static str> {
        match self {
            DataType::Byte => Some("Byte"),
            DataType::Int16 => Some("Int16"),
            DataType::UInt16 => Some("UInt16"),
            DataType::Int32 => Some("Int32"),
            DataType::UInt32 => Some("UInt32"),
            DataType::Float32 => Some("Float32"),
            DataType::Float64 => Some("Float64"),
            DataType::String => Some("String"),
            DataType::Url => Some("Url"),
            _ => None,
        }
    }

    /// Look up a type by its DMR tag or DDS keyword (case-insensitive).
    ///
    /// This accepts every known type; callers that parse the legacy
    /// grammar check [`DataType::is_dap2`] to reject DAP4-only types.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.dap4_name().eq_ignore_ascii_case(name))
    }

    /// Whether the DDS grammar can express this type.
    pub fn is_dap2(&self) -> bool {
        self.dap2_name().is_some()
    }

    /// Width in bytes of one element in DAP4 packing, `None` for
    /// variable-length types. Enums report `None` because their width
    /// depends on the enumeration's base type.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataType::Byte | DataType::Char | DataType::Int8 | DataType::UInt8 => Some(1),
            DataType::Int16 | DataType::UInt16 => Some(2),
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => Some(4),
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => Some(8),
            DataType::String | DataType::Url | DataType::Opaque | DataType::Enum => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::Byte
                | DataType::Char
                | DataType::Int8
                | DataType::UInt8
                | DataType::Int16
                | DataType::UInt16
                | DataType::Int32
                | DataType::UInt32
                | DataType::Int64
                | DataType::UInt64
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, DataType::String | DataType::Url)
    }

    /// Valid base types for a DAP4 enumeration.
    pub fn is_enum_base(&self) -> bool {
        self.is_integer() && *self != DataType::Char
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dap4_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_is_case_insensitive() {
        assert_eq!(DataType::from_name("Float32"), Some(DataType::Float32));
        assert_eq!(DataType::from_name("float32"), Some(DataType::Float32));
        assert_eq!(DataType::from_name("URL"), Some(DataType::Url));
        assert_eq!(DataType::from_name("Url"), Some(DataType::Url));
        assert_eq!(DataType::from_name("Float128"), None);
    }

    #[test]
    fn test_dap2_subset() {
        assert!(DataType::Int32.is_dap2());
        assert!(DataType::Url.is_dap2());
        assert!(!DataType::Int64.is_dap2());
        assert!(!DataType::UInt8.is_dap2());
        assert!(!DataType::Opaque.is_dap2());
        assert_eq!(DataType::Url.dap2_name(), Some("Url"));
    }

    #[test]
    fn test_fixed_sizes() {
        assert_eq!(DataType::Int8.fixed_size(), Some(1));
        assert_eq!(DataType::UInt16.fixed_size(), Some(2));
        assert_eq!(DataType::Float32.fixed_size(), Some(4));
        assert_eq!(DataType::Int64.fixed_size(), Some(8));
        assert_eq!(DataType::String.fixed_size(), None);
    }

    #[test]
    fn test_protocol_from_str() {
        assert_eq!(Protocol::from_str("DAP4"), Some(Protocol::Dap4));
        assert_eq!(Protocol::from_str("dap2"), Some(Protocol::Dap2));
        assert_eq!(Protocol::from_str("dap3"), None);
    }
}
