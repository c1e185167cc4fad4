//! Typed, ordered attribute maps.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dtype::DataType;

/// A single attribute value element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrScalar {
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl AttrScalar {
    /// Parse one textual value according to the declared type.
    ///
    /// Floating point values accept `NaN`, `Inf`, `-Inf` and `Infinity`
    /// in any letter case. Text values are taken as-is (callers strip the
    /// surrounding quotes).
    pub fn parse(dtype: DataType, raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        match dtype {
            DataType::Float32 | DataType::Float64 => parse_float(raw).map(AttrScalar::Float),
            DataType::Byte | DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => raw
                .parse::<u64>()
                .map(AttrScalar::UInt)
                .map_err(|e| format!("invalid {} value '{}': {}", dtype, raw, e)),
            t if t.is_integer() => raw
                .parse::<i64>()
                .map(AttrScalar::Int)
                .map_err(|e| format!("invalid {} value '{}': {}", dtype, raw, e)),
            _ => Ok(AttrScalar::Text(raw.to_string())),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrScalar::Int(v) => Some(*v as f64),
            AttrScalar::UInt(v) => Some(*v as f64),
            AttrScalar::Float(v) => Some(*v),
            AttrScalar::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrScalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

fn parse_float(raw: &str) -> Result<f64, String> {
    match raw.to_ascii_lowercase().as_str() {
        "nan" | "+nan" | "-nan" | "nanf" => Ok(f64::NAN),
        "inf" | "+inf" | "infinity" | "+infinity" | "inff" => Ok(f64::INFINITY),
        "-inf" | "-infinity" | "-inff" => Ok(f64::NEG_INFINITY),
        _ => raw
            .parse::<f64>()
            .map_err(|e| format!("invalid floating point value '{}': {}", raw, e)),
    }
}

impl fmt::Display for AttrScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrScalar::Int(v) => write!(f, "{}", v),
            AttrScalar::UInt(v) => write!(f, "{}", v),
            AttrScalar::Float(v) if v.is_nan() => f.write_str("NaN"),
            AttrScalar::Float(v) if v.is_infinite() => {
                f.write_str(if *v > 0.0 { "Inf" } else { "-Inf" })
            }
            AttrScalar::Float(v) => write!(f, "{}", v),
            AttrScalar::Text(s) => f.write_str(s),
        }
    }
}

/// An attribute: either a typed list of values or a nested container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Values {
        dtype: DataType,
        values: Vec<AttrScalar>,
    },
    Container(Attributes),
}

impl AttributeValue {
    /// Parse a list of raw values declared with `dtype`.
    pub fn parse<S: AsRef<str>>(dtype: DataType, raw: &[S]) -> Result<Self, String> {
        let values = raw
            .iter()
            .map(|r| AttrScalar::parse(dtype, r.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AttributeValue::Values { dtype, values })
    }

    /// Single text value.
    pub fn text(value: impl Into<String>) -> Self {
        AttributeValue::Values {
            dtype: DataType::String,
            values: vec![AttrScalar::Text(value.into())],
        }
    }

    /// The declared type, `None` for containers.
    pub fn dtype(&self) -> Option<DataType> {
        match self {
            AttributeValue::Values { dtype, .. } => Some(*dtype),
            AttributeValue::Container(_) => None,
        }
    }

    pub fn values(&self) -> &[AttrScalar] {
        match self {
            AttributeValue::Values { values, .. } => values,
            AttributeValue::Container(_) => &[],
        }
    }

    pub fn as_container(&self) -> Option<&Attributes> {
        match self {
            AttributeValue::Container(attrs) => Some(attrs),
            _ => None,
        }
    }

    /// First value as text, handy for single-valued string attributes.
    pub fn first_str(&self) -> Option<&str> {
        self.values().first().and_then(AttrScalar::as_str)
    }

    /// First value as a number.
    pub fn first_f64(&self) -> Option<f64> {
        self.values().first().and_then(AttrScalar::as_f64)
    }
}

/// Insertion-ordered attribute map.
///
/// Re-inserting an existing key replaces the value in place, keeping the
/// original declaration position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes {
    entries: Vec<(String, AttributeValue)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut AttributeValue> {
        self.entries.iter_mut().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert or replace an attribute, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: AttributeValue) -> Option<AttributeValue> {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        let idx = self.entries.iter().position(|(k, _)| k == name)?;
        Some(self.entries.remove(idx).1)
    }

    /// Merge `other` into `self`. Containers present on both sides are
    /// merged recursively, everything else is replaced.
    pub fn merge(&mut self, other: Attributes) {
        for (key, value) in other.entries {
            match value {
                AttributeValue::Container(incoming) => {
                    if let Some(AttributeValue::Container(existing)) = self.get_mut(&key) {
                        existing.merge(incoming);
                    } else {
                        self.insert(key, AttributeValue::Container(incoming));
                    }
                }
                value => {
                    self.insert(key, value);
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl FromIterator<(String, AttributeValue)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, AttributeValue)>>(iter: I) -> Self {
        let mut attrs = Attributes::new();
        for (k, v) in iter {
            attrs.insert(k, v);
        }
        attrs
    }
}

impl IntoIterator for Attributes {
    type Item = (String, AttributeValue);
    type IntoIter = std::vec::IntoIter<(String, AttributeValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_special_values() {
        let v = AttributeValue::parse(DataType::Float32, &["NaN", "Inf", "-inf", "1.5e-3"]).unwrap();
        let values = v.values();
        assert!(values[0].as_f64().unwrap().is_nan());
        assert_eq!(values[1].as_f64(), Some(f64::INFINITY));
        assert_eq!(values[2].as_f64(), Some(f64::NEG_INFINITY));
        assert_eq!(values[3].as_f64(), Some(1.5e-3));
        assert_eq!(values[0].to_string(), "NaN");
        assert_eq!(values[2].to_string(), "-Inf");
    }

    #[test]
    fn test_float64_precision_preserved() {
        let v = AttributeValue::parse(DataType::Float64, &["0.1234567890123456789"]).unwrap();
        let parsed = v.first_f64().unwrap();
        assert_eq!(parsed, "0.1234567890123456789".parse::<f64>().unwrap());
        assert_ne!(parsed, 0.123_456_789_f32 as f64);
    }

    #[test]
    fn test_integer_parsing() {
        let v = AttributeValue::parse(DataType::Int16, &["-32768", "7"]).unwrap();
        assert_eq!(v.values(), &[AttrScalar::Int(-32768), AttrScalar::Int(7)]);
        let v = AttributeValue::parse(DataType::UInt64, &["18446744073709551615"]).unwrap();
        assert_eq!(v.values(), &[AttrScalar::UInt(u64::MAX)]);
        assert!(AttributeValue::parse(DataType::Int32, &["abc"]).is_err());
    }

    #[test]
    fn test_insertion_order_and_replace() {
        let mut attrs = Attributes::new();
        attrs.insert("units", AttributeValue::text("K"));
        attrs.insert("long_name", AttributeValue::text("temperature"));
        attrs.insert("units", AttributeValue::text("degC"));
        let keys: Vec<_> = attrs.keys().collect();
        assert_eq!(keys, vec!["units", "long_name"]);
        assert_eq!(attrs.get("units").and_then(|v| v.first_str()), Some("degC"));
    }

    #[test]
    fn test_merge_nested_containers() {
        let mut a = Attributes::new();
        let mut inner = Attributes::new();
        inner.insert("x", AttributeValue::text("1"));
        a.insert("NC_GLOBAL", AttributeValue::Container(inner));

        let mut b = Attributes::new();
        let mut inner = Attributes::new();
        inner.insert("y", AttributeValue::text("2"));
        b.insert("NC_GLOBAL", AttributeValue::Container(inner));
        b.insert("title", AttributeValue::text("t"));

        a.merge(b);
        let global = a.get("NC_GLOBAL").and_then(|v| v.as_container()).unwrap();
        assert_eq!(global.len(), 2);
        assert!(a.contains("title"));
    }

    #[test]
    fn test_json_keeps_declaration_order() {
        let mut attrs = Attributes::new();
        attrs.insert("units", AttributeValue::text("K"));
        attrs.insert("valid_range", AttributeValue::parse(DataType::Int16, &["0", "10"]).unwrap());
        let json = serde_json::to_string(&attrs).unwrap();
        assert!(json.find("units").unwrap() < json.find("valid_range").unwrap());
        assert!(json.contains("[0,10]"));
    }
}
