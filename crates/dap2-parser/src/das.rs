//! DAS (Dataset Attribute Structure) parsing, merging and serialization.

use tracing::{debug, warn};

use dap_model::{
    escape_name, AttributeValue, Attributes, DapResult, DataType, Dataset, Variable,
};

use crate::lexer::{Token, TokenCursor};

/// Containers whose attributes describe the whole dataset.
pub fn is_global_container(name: &str) -> bool {
    name == "NC_GLOBAL" || name == "DODS_EXTRA" || name.ends_with("_GLOBAL")
}

/// Parse a DAS document into its top-level attribute containers.
pub fn parse_das(text: &str) -> DapResult<Attributes> {
    let mut cursor = TokenCursor::new(text)?;
    cursor.expect_keyword("Attributes")?;
    cursor.expect_punct('{')?;
    let attributes = parse_entries(&mut cursor)?;
    cursor.expect_punct('}')?;
    if !cursor.is_at_end() {
        return Err(cursor.error(format!(
            "unexpected {} after the attribute block",
            cursor.describe_next()
        )));
    }
    Ok(attributes)
}

fn parse_entries(cursor: &mut TokenCursor<'_>) -> DapResult<Attributes> {
    let mut attributes = Attributes::new();
    loop {
        if cursor.is_punct('}') {
            return Ok(attributes);
        }
        if cursor.is_at_end() {
            return Err(cursor.error("unexpected end of input, expected '}'"));
        }

        let offset = cursor.offset();
        let head = cursor.expect_word("an attribute type or container name")?;

        if cursor.eat_punct('{') {
            let inner = parse_entries(cursor)?;
            cursor.expect_punct('}')?;
            let mut incoming = Attributes::new();
            incoming.insert(escape_name(head), AttributeValue::Container(inner));
            attributes.merge(incoming);
            continue;
        }

        if head.eq_ignore_ascii_case("Alias") {
            let name = cursor.expect_word("alias name")?;
            let target = match cursor.next_token() {
                Some(Token::Word(w)) => w.to_string(),
                Some(Token::Quoted(s)) => s,
                _ => return Err(cursor.error_at("expected alias target", offset)),
            };
            cursor.expect_punct(';')?;
            attributes.insert(name, AttributeValue::text(target));
            continue;
        }

        let dtype = DataType::from_name(head).ok_or_else(|| {
            cursor.error_at(format!("unknown attribute type '{}'", head), offset)
        })?;
        let name = cursor.expect_word("attribute name")?;
        let raw = parse_values(cursor)?;
        let value = AttributeValue::parse(dtype, &raw).map_err(|m| cursor.error_at(m, offset))?;
        attributes.insert(name, value);
    }
}

/// Comma separated values up to and including the terminating `;`.
fn parse_values(cursor: &mut TokenCursor<'_>) -> DapResult<Vec<String>> {
    let mut values = Vec::new();
    if cursor.eat_punct(';') {
        return Ok(values);
    }
    loop {
        match cursor.next_token() {
            Some(Token::Word(w)) => values.push(w.to_string()),
            Some(Token::Quoted(s)) => values.push(s),
            _ => return Err(cursor.error("expected an attribute value")),
        }
        if cursor.eat_punct(',') {
            continue;
        }
        cursor.expect_punct(';')?;
        return Ok(values);
    }
}

/// Attach parsed DAS containers to the variables of `dataset`.
///
/// Global containers and unmatched top-level containers go to the dataset
/// attributes. Nested containers that match no member of a constructor are
/// logged and dropped; containers nested under a leaf are kept as nested
/// attribute containers.
pub fn apply_das(dataset: &mut Dataset, das: Attributes) {
    for (name, value) in das {
        match value {
            AttributeValue::Container(attrs) if is_global_container(&name) => {
                attach_container(dataset.attributes_mut(), name, attrs);
            }
            AttributeValue::Container(attrs) => {
                let fqn = escape_name(&name);
                if dataset.find(&fqn).is_some() {
                    apply_to_variable(dataset, &fqn, attrs);
                } else {
                    warn!(container = %name, "DAS container matches no variable, attaching to dataset attributes");
                    attach_container(dataset.attributes_mut(), name, attrs);
                }
            }
            value => {
                dataset.attributes_mut().insert(name, value);
            }
        }
    }
    debug!(dataset = %dataset.name(), "Merged DAS attributes");
}

fn apply_to_variable(dataset: &mut Dataset, fqn: &str, attrs: Attributes) {
    let is_leaf = dataset.leaf(fqn).is_some();
    for (key, value) in attrs {
        match value {
            AttributeValue::Container(inner) if !is_leaf => {
                let child = format!("{}.{}", fqn, escape_name(&key));
                if dataset.find(&child).is_some() {
                    apply_to_variable(dataset, &child, inner);
                } else {
                    warn!(path = %child, "DAS container matches no variable, dropping it");
                }
            }
            value => {
                if let Some(target) = dataset.attributes_of_mut(fqn) {
                    target.insert(key, value);
                }
            }
        }
    }
}

fn attach_container(target: &mut Attributes, name: String, attrs: Attributes) {
    let mut incoming = Attributes::new();
    incoming.insert(name, AttributeValue::Container(attrs));
    target.merge(incoming);
}

/// Serialize the attributes of every node in `dataset` as a DAS document.
pub fn to_das(dataset: &Dataset) -> String {
    let mut out = String::from("Attributes {\n");
    write_attributes(&mut out, dataset.attributes(), 1);
    for child in Variable::children(dataset) {
        write_variable(&mut out, child, 1);
    }
    out.push_str("}\n");
    out
}

fn write_variable(out: &mut String, var: &dyn Variable, depth: usize) {
    let indent = "    ".repeat(depth);
    out.push_str(&format!("{}{} {{\n", indent, var.name()));
    write_attributes(out, var.attributes(), depth + 1);
    for child in var.children() {
        write_variable(out, child, depth + 1);
    }
    out.push_str(&format!("{}}}\n", indent));
}

fn write_attributes(out: &mut String, attrs: &Attributes, depth: usize) {
    let indent = "    ".repeat(depth);
    for (name, value) in attrs.iter() {
        match value {
            AttributeValue::Container(inner) => {
                out.push_str(&format!("{}{} {{\n", indent, name));
                write_attributes(out, inner, depth + 1);
                out.push_str(&format!("{}}}\n", indent));
            }
            AttributeValue::Values { dtype, values } => {
                let keyword = dtype.dap2_name().unwrap_or(dtype.dap4_name());
                let rendered: Vec<String> = values
                    .iter()
                    .map(|v| {
                        if dtype.is_text() {
                            quote(&v.to_string())
                        } else {
                            v.to_string()
                        }
                    })
                    .collect();
                out.push_str(&format!("{}{} {} {};\n", indent, keyword, name, rendered.join(", ")));
            }
        }
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Parse a DAS document and merge it into `dataset` in one step.
pub fn merge_das(dataset: &mut Dataset, text: &str) -> DapResult<()> {
    let das = parse_das(text)?;
    apply_das(dataset, das);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dds::parse_dds;
    use dap_model::DapError;

    const DDS: &str = r#"Dataset {
    Float32 SST[TIME = 12];
    Structure {
        Int32 id;
    } station;
    Grid {
      Array:
        Int16 z[x = 2];
      Maps:
        Float64 x[x = 2];
    } g;
} example;"#;

    const DAS: &str = r#"Attributes {
    NC_GLOBAL {
        String title "Monthly \"mean\" SST";
        Float64 version 1.5;
    }
    SST {
        String units "degC";
        Int16 valid_range -5, 40;
        Alias temperature SST;
    }
    station {
        String description "fixed buoy";
        id {
            String long_name "station id";
        }
        missing {
            String note "no such member";
        }
    }
    g {
        x {
            String units "m";
            Float32 _FillValue NaN;
        }
    }
    orphan {
        String note "kept on the dataset";
    }
}"#;

    fn merged() -> Dataset {
        let mut ds = parse_dds(DDS).unwrap();
        merge_das(&mut ds, DAS).unwrap();
        ds
    }

    #[test]
    fn test_parse_values_and_types() {
        let das = parse_das(DAS).unwrap();
        let sst = das.get("SST").and_then(|v| v.as_container()).unwrap();
        assert_eq!(sst.get("units").and_then(|v| v.first_str()), Some("degC"));
        let x = das
            .get("g")
            .and_then(|v| v.as_container())
            .and_then(|g| g.get("x"))
            .and_then(|v| v.as_container())
            .unwrap();
        assert!(x.get("_FillValue").and_then(|v| v.first_f64()).unwrap().is_nan());
        assert_eq!(sst.get("valid_range").map(|v| v.values().len()), Some(2));
        assert_eq!(sst.get("temperature").and_then(|v| v.first_str()), Some("SST"));
    }

    #[test]
    fn test_global_containers_go_to_dataset() {
        let ds = merged();
        let global = ds.attributes().get("NC_GLOBAL").and_then(|v| v.as_container()).unwrap();
        assert_eq!(
            global.get("title").and_then(|v| v.first_str()),
            Some("Monthly \"mean\" SST")
        );
        assert!(is_global_container("HDF_GLOBAL"));
        assert!(!is_global_container("GLOBALS"));
    }

    #[test]
    fn test_variable_attributes_attached() {
        let ds = merged();
        assert!(ds.leaf("SST").unwrap().attributes.contains("units"));
        assert!(ds.node("station").unwrap().attributes().contains("description"));
        assert!(ds.leaf("station.id").unwrap().attributes.contains("long_name"));
        assert!(ds.leaf("g.x").unwrap().attributes.contains("units"));
    }

    #[test]
    fn test_unmatched_paths() {
        let ds = merged();
        // Nested under a constructor: dropped
        assert!(!ds.node("station").unwrap().attributes().contains("missing"));
        // Top level: attached to the dataset
        assert!(ds.attributes().get("orphan").and_then(|v| v.as_container()).is_some());
    }

    #[test]
    fn test_bad_value_reports_position() {
        let err = parse_das("Attributes {\n  x {\n    Int32 n abc;\n  }\n}").unwrap_err();
        assert!(matches!(err, DapError::MetadataParse { .. }));
        assert_eq!(err.position().map(|p| p.line), Some(3));
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(parse_das("Attributes { x { Quux a 1; } }").is_err());
    }

    #[test]
    fn test_to_das_round_trip() {
        let ds = merged();
        let text = to_das(&ds);
        assert!(text.contains("String units \"degC\";"));
        let mut again = parse_dds(DDS).unwrap();
        merge_das(&mut again, &text).unwrap();
        assert_eq!(again.leaf("SST").unwrap().attributes, ds.leaf("SST").unwrap().attributes);
        assert_eq!(again.attributes().get("NC_GLOBAL"), ds.attributes().get("NC_GLOBAL"));
    }
}
