//! DMR (Dataset Metadata Response) parsing and serialization.
//!
//! The document is read with `quick-xml` into a small element tree first,
//! then walked top-down so that dimension and enumeration references can
//! be resolved through the enclosing groups.

use std::collections::HashMap;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use dap_model::{
    escape_name, in_scope, unescape_name, AttributeValue, Attributes, DapError, DapResult, DataType,
    Dataset, Dim, Dimension, Enumeration, Group, Leaf, Node, Protocol, Sequence, Structure, Variable,
};

/// One XML element with its attributes, text and children.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
    offset: usize,
}

impl Element {
    fn open(start: &BytesStart<'_>, offset: usize, source: &str) -> DapResult<Self> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| DapError::parse_at(e.to_string(), source, offset))?;
            if attr.key.as_ref().starts_with(b"xmlns") {
                continue;
            }
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| DapError::parse_at(e.to_string(), source, offset))?;
            attrs.push((key, value.into_owned()));
        }
        Ok(Self {
            name,
            attrs,
            offset,
            ..Default::default()
        })
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

fn read_tree(text: &str) -> DapResult<Element> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let before = reader.buffer_position();
        // Skipped whitespace is not part of the element
        let offset = text[before..].find('<').map_or(before, |i| before + i);
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(Element::open(&e, offset, text)?),
            Ok(Event::Empty(e)) => {
                let element = Element::open(&e, offset, text)?;
                attach(&mut stack, &mut root, element, text)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| DapError::parse_at("unbalanced closing tag", text, offset))?;
                attach(&mut stack, &mut root, element, text)?;
            }
            Ok(Event::Text(t)) => {
                let value = t
                    .unescape()
                    .map_err(|e| DapError::parse_at(e.to_string(), text, offset))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&value);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(DapError::parse_at(e.to_string(), text, reader.buffer_position())),
        }
    }

    if let Some(open) = stack.last() {
        return Err(DapError::parse_at(
            format!("unexpected end of document inside <{}>", open.name),
            text,
            text.len(),
        ));
    }
    root.ok_or_else(|| DapError::parse("DMR document has no root element"))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element, text: &str) -> DapResult<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(DapError::parse_at(
                "more than one root element",
                text,
                element.offset,
            ))
        }
    }
    Ok(())
}

/// Parse a DMR document into a DAP4 dataset tree.
pub fn parse_dmr(text: &str) -> DapResult<Dataset> {
    let tree = read_tree(text)?;
    if tree.name != "Dataset" {
        return Err(DapError::parse_at(
            format!("expected a <Dataset> root element, found <{}>", tree.name),
            text,
            tree.offset,
        ));
    }
    let name = tree
        .attr("name")
        .ok_or_else(|| DapError::parse_at("<Dataset> has no name", text, tree.offset))?;

    let mut builder = DmrBuilder {
        text,
        dims: HashMap::new(),
        enums: HashMap::new(),
    };
    let mut root = Group::new(name);
    builder.fill_group(&tree, "", &mut root)?;

    let mut dataset =
        Dataset::new(Protocol::Dap4, root).map_err(|e| builder.locate(e, tree.offset))?;
    dataset.dap_version = tree.attr("dapVersion").map(str::to_string);
    dataset.dmr_version = tree.attr("dmrVersion").map(str::to_string);
    debug!(
        dataset = %dataset.name(),
        groups = dataset.groups().len(),
        variables = dataset.walk().len(),
        "Parsed DMR"
    );
    Ok(dataset)
}

struct DmrBuilder<'a> {
    text: &'a str,
    /// Shared dimension sizes by fully qualified name.
    dims: HashMap<String, usize>,
    /// Enumeration base types by fully qualified name.
    enums: HashMap<String, DataType>,
}

impl<'a> DmrBuilder<'a> {
    fn error(&self, message: impl Into<String>, el: &Element) -> DapError {
        DapError::parse_at(message, self.text, el.offset)
    }

    fn locate(&self, err: DapError, offset: usize) -> DapError {
        match err {
            DapError::Model(message) => DapError::parse_at(message, self.text, offset),
            other => other,
        }
    }

    fn required<'e>(&self, el: &'e Element, key: &str) -> DapResult<&'e str> {
        el.attr(key)
            .ok_or_else(|| self.error(format!("<{}> is missing its '{}' attribute", el.name, key), el))
    }

    /// `path` is the group's FQN, empty for the root.
    fn fill_group(&mut self, el: &Element, path: &str, group: &mut Group) -> DapResult<()> {
        for child in &el.children {
            match child.name.as_str() {
                "Dimension" => {
                    let name = self.required(child, "name")?;
                    let size = self.parse_size(child)?;
                    group
                        .add_dimension(Dimension::new(name, size))
                        .map_err(|e| self.locate(e, child.offset))?;
                    self.dims.insert(format!("{}/{}", path, escape_name(name)), size);
                }
                "Enumeration" => {
                    let enumeration = self.parse_enumeration(child)?;
                    self.enums
                        .insert(format!("{}/{}", path, enumeration.name()), enumeration.base);
                    group
                        .add_enumeration(enumeration)
                        .map_err(|e| self.locate(e, child.offset))?;
                }
                "Group" => {
                    let name = self.required(child, "name")?;
                    let mut inner = Group::new(name);
                    let inner_path = format!("{}/{}", path, inner.name());
                    self.fill_group(child, &inner_path, &mut inner)?;
                    group.add(inner.into()).map_err(|e| self.locate(e, child.offset))?;
                }
                "Attribute" => {
                    let (name, value) = self.parse_attribute(child)?;
                    group.attributes.insert(name, value);
                }
                _ => match self.parse_variable(child, path)? {
                    Some(node) => group.add(node).map_err(|e| self.locate(e, child.offset))?,
                    None => warn!(element = %child.name, "Ignoring unknown DMR element"),
                },
            }
        }
        Ok(())
    }

    fn parse_size(&self, el: &Element) -> DapResult<usize> {
        let raw = self.required(el, "size")?;
        raw.trim()
            .parse::<usize>()
            .map_err(|_| self.error(format!("invalid dimension size '{}'", raw), el))
    }

    fn parse_enumeration(&self, el: &Element) -> DapResult<Enumeration> {
        let name = self.required(el, "name")?;
        let base_name = self.required(el, "basetype")?;
        let base = DataType::from_name(base_name)
            .filter(DataType::is_enum_base)
            .ok_or_else(|| self.error(format!("invalid enumeration base type '{}'", base_name), el))?;
        let mut enumeration = Enumeration::new(name, base);
        for constant in el.children.iter().filter(|c| c.name == "EnumConst") {
            let label = self.required(constant, "name")?;
            let raw = self.required(constant, "value")?;
            let value = raw
                .trim()
                .parse::<i64>()
                .map_err(|_| self.error(format!("invalid enumeration value '{}'", raw), constant))?;
            enumeration.constants.push((label.to_string(), value));
        }
        Ok(enumeration)
    }

    /// A variable element, `None` if the tag is not a DAP4 variable.
    fn parse_variable(&mut self, el: &Element, path: &str) -> DapResult<Option<Node>> {
        let node = match el.name.as_str() {
            "Structure" => {
                let mut structure = Structure::new(self.required(el, "name")?);
                let mut dims = Vec::new();
                for child in &el.children {
                    match child.name.as_str() {
                        "Dim" => dims.push(self.parse_dim(child, path)?),
                        "Attribute" => {
                            let (name, value) = self.parse_attribute(child)?;
                            structure.attributes.insert(name, value);
                        }
                        _ => {
                            let member = self.expect_variable(child, path)?;
                            structure.add(member).map_err(|e| self.locate(e, child.offset))?;
                        }
                    }
                }
                structure.with_dims(dims).into()
            }
            "Sequence" => {
                let mut sequence = Sequence::new(self.required(el, "name")?);
                for child in &el.children {
                    match child.name.as_str() {
                        "Attribute" => {
                            let (name, value) = self.parse_attribute(child)?;
                            sequence.attributes.insert(name, value);
                        }
                        "Dim" => return Err(self.error("arrays of sequences are not supported", child)),
                        _ => {
                            let column = self.expect_variable(child, path)?;
                            sequence.add(column).map_err(|e| self.locate(e, child.offset))?;
                        }
                    }
                }
                sequence.into()
            }
            "Enum" => {
                let reference = self.required(el, "enum")?;
                let fqn = resolve(reference, path, |k| self.enums.contains_key(k)).ok_or_else(|| {
                    self.error(format!("undeclared enumeration '{}'", reference), el)
                })?;
                let base = self.enums.get(&fqn).copied().unwrap_or(DataType::Int64);
                let (dims, maps, attributes) = self.parse_leaf_children(el, path)?;
                Leaf::enumerated(self.required(el, "name")?, fqn, base, dims)
                    .with_maps(maps)
                    .with_attributes(attributes)
                    .into()
            }
            tag => {
                let Some(dtype) = DataType::from_name(tag).filter(|t| *t != DataType::Enum) else {
                    return Ok(None);
                };
                let (dims, maps, attributes) = self.parse_leaf_children(el, path)?;
                Leaf::new(self.required(el, "name")?, dtype, dims)
                    .with_maps(maps)
                    .with_attributes(attributes)
                    .into()
            }
        };
        Ok(Some(node))
    }

    fn expect_variable(&mut self, el: &Element, path: &str) -> DapResult<Node> {
        self.parse_variable(el, path)?
            .ok_or_else(|| self.error(format!("unexpected <{}> inside a constructor", el.name), el))
    }

    fn parse_leaf_children(&self, el: &Element, path: &str) -> DapResult<(Vec<Dim>, Vec<String>, Attributes)> {
        let mut dims = Vec::new();
        let mut maps = Vec::new();
        let mut attributes = Attributes::new();
        for child in &el.children {
            match child.name.as_str() {
                "Dim" => dims.push(self.parse_dim(child, path)?),
                "Map" => {
                    let name = self.required(child, "name")?;
                    maps.push(absolute_name(name, path));
                }
                "Attribute" => {
                    let (name, value) = self.parse_attribute(child)?;
                    attributes.insert(name, value);
                }
                other => warn!(element = %other, variable = ?el.attr("name"), "Ignoring unknown DMR element"),
            }
        }
        if dims.iter().try_fold(1usize, |acc, d| acc.checked_mul(d.size)).is_none() {
            return Err(self.error("dimension sizes overflow the element count", el));
        }
        Ok((dims, maps, attributes))
    }

    /// `<Dim name="..."/>` resolved to a shared dimension, or an
    /// anonymous `<Dim size="n"/>`.
    fn parse_dim(&self, el: &Element, path: &str) -> DapResult<Dim> {
        match el.attr("name") {
            Some(reference) => {
                let fqn = resolve(reference, path, |k| self.dims.contains_key(k))
                    .ok_or_else(|| self.error(format!("undeclared dimension '{}'", reference), el))?;
                let size = self.dims.get(&fqn).copied().unwrap_or_default();
                Ok(Dim::named(fqn, size))
            }
            None => Ok(Dim::anonymous(self.parse_size(el)?)),
        }
    }

    fn parse_attribute(&self, el: &Element) -> DapResult<(String, AttributeValue)> {
        let name = self.required(el, "name")?.to_string();
        let type_name = self.required(el, "type")?;

        if type_name.eq_ignore_ascii_case("Container") {
            let mut container = Attributes::new();
            for child in el.children.iter().filter(|c| c.name == "Attribute") {
                let (key, value) = self.parse_attribute(child)?;
                container.insert(key, value);
            }
            return Ok((name, AttributeValue::Container(container)));
        }
        if type_name.eq_ignore_ascii_case("OtherXML") {
            warn!(attribute = %name, "OtherXML attribute kept as its text content");
            return Ok((name, AttributeValue::text(el.text.trim())));
        }

        let dtype = DataType::from_name(type_name)
            .ok_or_else(|| self.error(format!("unknown attribute type '{}'", type_name), el))?;
        let raw: Vec<&str> = match el.attr("value") {
            Some(v) => vec![v],
            None => el
                .children
                .iter()
                .filter(|c| c.name == "Value")
                .map(|c| c.attr("value").unwrap_or(c.text.as_str()))
                .collect(),
        };
        let value = AttributeValue::parse(dtype, &raw).map_err(|m| self.error(m, el))?;
        Ok((name, value))
    }
}

fn escape_path(path: &str) -> String {
    path.split('/').map(escape_name).collect::<Vec<_>>().join("/")
}

/// Make a reference absolute without checking that it exists.
fn absolute_name(reference: &str, path: &str) -> String {
    if reference.starts_with('/') {
        escape_path(reference)
    } else {
        format!("{}/{}", path, escape_path(reference))
    }
}

/// Resolve a dimension or enumeration reference.
///
/// Absolute references are taken as-is; relative ones are looked up in the
/// current group, then in each enclosing group up to the root.
fn resolve(reference: &str, path: &str, exists: impl Fn(&str) -> bool) -> Option<String> {
    if reference.starts_with('/') {
        let fqn = escape_path(reference);
        let enclosing = in_scope(&fqn, &format!("{}/", path));
        return (enclosing && exists(&fqn)).then_some(fqn);
    }
    let escaped = escape_path(reference);
    let mut scope = path;
    loop {
        let candidate = format!("{}/{}", scope, escaped);
        if exists(&candidate) {
            return Some(candidate);
        }
        if scope.is_empty() {
            return None;
        }
        scope = scope.rfind('/').map(|i| &scope[..i]).unwrap_or("");
    }
}

/// Serialize a dataset as a DMR document.
pub fn to_dmr(dataset: &Dataset) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n");
    out.push_str(&format!(
        "<Dataset xmlns=\"http://xml.opendap.org/ns/DAP/4.0#\" dapVersion=\"{}\" dmrVersion=\"{}\" name=\"{}\">\n",
        escape(dataset.dap_version.as_deref().unwrap_or("4.0")),
        escape(dataset.dmr_version.as_deref().unwrap_or("1.0")),
        escape(&unescape_name(dataset.name()))
    ));
    write_group_body(&mut out, dataset.root(), 1);
    out.push_str("</Dataset>\n");
    out
}

fn write_group_body(out: &mut String, group: &Group, depth: usize) {
    let indent = "    ".repeat(depth);
    for dim in group.dimensions() {
        out.push_str(&format!(
            "{}<Dimension name=\"{}\" size=\"{}\"/>\n",
            indent,
            escape(&unescape_name(dim.name())),
            dim.size
        ));
    }
    for e in group.enumerations() {
        out.push_str(&format!(
            "{}<Enumeration name=\"{}\" basetype=\"{}\">\n",
            indent,
            escape(&unescape_name(e.name())),
            e.base
        ));
        for (label, value) in &e.constants {
            out.push_str(&format!(
                "{}    <EnumConst name=\"{}\" value=\"{}\"/>\n",
                indent,
                escape(label),
                value
            ));
        }
        out.push_str(&format!("{}</Enumeration>\n", indent));
    }
    for node in group.members() {
        write_node(out, node, depth);
    }
    write_attributes(out, &group.attributes, depth);
}

fn write_node(out: &mut String, node: &Node, depth: usize) {
    let indent = "    ".repeat(depth);
    let name = escape(&unescape_name(node.name())).into_owned();
    match node {
        Node::Leaf(leaf) => {
            let open = match leaf.enumeration() {
                Some(e) => format!("{}<Enum name=\"{}\" enum=\"{}\"", indent, name, escape(e)),
                None => format!("{}<{} name=\"{}\"", indent, leaf.data_type(), name),
            };
            let mut body = String::new();
            write_dims(&mut body, leaf.dims(), depth + 1);
            for map in leaf.maps() {
                body.push_str(&format!("{}    <Map name=\"{}\"/>\n", indent, escape(map)));
            }
            write_attributes(&mut body, &leaf.attributes, depth + 1);
            let tag = if leaf.enumeration().is_some() {
                "Enum".to_string()
            } else {
                leaf.data_type().to_string()
            };
            close_element(out, open, &body, &indent, &tag);
        }
        Node::Structure(s) => {
            out.push_str(&format!("{}<Structure name=\"{}\">\n", indent, name));
            write_dims(out, s.dims(), depth + 1);
            for member in s.members() {
                write_node(out, member, depth + 1);
            }
            write_attributes(out, &s.attributes, depth + 1);
            out.push_str(&format!("{}</Structure>\n", indent));
        }
        Node::Sequence(s) => {
            out.push_str(&format!("{}<Sequence name=\"{}\">\n", indent, name));
            for column in s.columns() {
                write_node(out, column, depth + 1);
            }
            write_attributes(out, &s.attributes, depth + 1);
            out.push_str(&format!("{}</Sequence>\n", indent));
        }
        Node::Group(g) => {
            out.push_str(&format!("{}<Group name=\"{}\">\n", indent, name));
            write_group_body(out, g, depth + 1);
            out.push_str(&format!("{}</Group>\n", indent));
        }
        Node::Grid(g) => {
            // DAP4 has no grids: the array and its maps become sibling arrays.
            write_node(out, &Node::Leaf(g.array().clone()), depth);
            for map in g.maps() {
                write_node(out, &Node::Leaf(map.clone()), depth);
            }
        }
    }
}

fn close_element(out: &mut String, open: String, body: &str, indent: &str, tag: &str) {
    out.push_str(&open);
    if body.is_empty() {
        out.push_str("/>\n");
    } else {
        out.push_str(">\n");
        out.push_str(body);
        out.push_str(&format!("{}</{}>\n", indent, tag));
    }
}

fn write_dims(out: &mut String, dims: &[Dim], depth: usize) {
    let indent = "    ".repeat(depth);
    for dim in dims {
        match &dim.name {
            Some(name) => out.push_str(&format!("{}<Dim name=\"{}\"/>\n", indent, escape(name))),
            None => out.push_str(&format!("{}<Dim size=\"{}\"/>\n", indent, dim.size)),
        }
    }
}

fn write_attributes(out: &mut String, attributes: &Attributes, depth: usize) {
    let indent = "    ".repeat(depth);
    for (name, value) in attributes.iter() {
        match value {
            AttributeValue::Container(inner) => {
                out.push_str(&format!(
                    "{}<Attribute name=\"{}\" type=\"Container\">\n",
                    indent,
                    escape(name)
                ));
                write_attributes(out, inner, depth + 1);
                out.push_str(&format!("{}</Attribute>\n", indent));
            }
            AttributeValue::Values { dtype, values } => {
                out.push_str(&format!(
                    "{}<Attribute name=\"{}\" type=\"{}\">\n",
                    indent,
                    escape(name),
                    dtype
                ));
                for v in values {
                    out.push_str(&format!("{}    <Value>{}</Value>\n", indent, escape(&v.to_string())));
                }
                out.push_str(&format!("{}</Attribute>\n", indent));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dap_model::{AttrScalar, NodeKind};
    use test_utils::fixtures;

    #[test]
    fn test_groups_and_shared_dimension() {
        let ds = parse_dmr(fixtures::ATL03_DMR).unwrap();
        assert_eq!(ds.protocol(), Protocol::Dap4);
        assert_eq!(ds.dap_version.as_deref(), Some("4.0"));
        assert_eq!(ds.dmr_version.as_deref(), Some("1.0"));

        let h = ds.leaf("/gt1r/heights/h_ph").unwrap();
        assert_eq!(h.shape(), vec![100]);
        assert_eq!(h.dims()[0].name.as_deref(), Some("/gt1r/heights/delta_time"));
        assert_eq!(h.maps(), &["/gt1r/heights/delta_time".to_string()]);
        let fill = h.attributes.get("_FillValue").and_then(|v| v.first_f64()).unwrap();
        assert!(fill.is_nan());

        // Relative reference resolved through the enclosing group
        let lat = ds.leaf("/gt1r/heights/lat_ph").unwrap();
        assert_eq!(lat.dims()[0].name.as_deref(), Some("/gt1r/heights/delta_time"));
        assert_eq!(ds.attributes().get("short_name").and_then(|v| v.first_str()), Some("ATL03"));
    }

    #[test]
    fn test_every_element_kind() {
        let ds = parse_dmr(fixtures::FULL_DMR).unwrap();
        assert_eq!(ds.leaf("/counts").unwrap().data_type(), DataType::Int64);

        let flag = ds.leaf("/flag").unwrap();
        assert_eq!(flag.enumeration(), Some("/quality"));
        assert_eq!(flag.storage_type(), DataType::UInt8);
        assert_eq!(ds.enumeration("/quality").and_then(|e| e.label(1)), Some("bad"));

        assert_eq!(ds.node("/point").map(|n| n.kind()), Some(NodeKind::Structure));
        assert!(ds.leaf("/point.lat").is_some());
        assert_eq!(ds.sequence("/obs").map(|s| s.columns().len()), Some(2));
        assert_eq!(ds.leaf("/blob").unwrap().data_type(), DataType::Opaque);
        assert_eq!(ds.leaf("/anon").unwrap().dims(), &[Dim::anonymous(2)]);

        let history = ds.attributes().get("history").unwrap();
        assert_eq!(
            history.values(),
            &[AttrScalar::Text("created".into()), AttrScalar::Text("modified".into())]
        );
        let precision = ds
            .attributes()
            .get("extra")
            .and_then(|v| v.as_container())
            .and_then(|c| c.get("precision"))
            .and_then(|v| v.first_f64())
            .unwrap();
        assert_eq!(precision, "0.1234567890123456789".parse::<f64>().unwrap());
    }

    #[test]
    fn test_escaped_names() {
        let dmr = r#"<Dataset name="d"><Float32 name="air temp"/></Dataset>"#;
        let ds = parse_dmr(dmr).unwrap();
        assert!(ds.leaf("/air%20temp").is_some());
    }

    #[test]
    fn test_undeclared_dimension_has_position() {
        let dmr = "<Dataset name=\"d\">\n  <Int32 name=\"v\">\n    <Dim name=\"/missing\"/>\n  </Int32>\n</Dataset>";
        let err = parse_dmr(dmr).unwrap_err();
        assert_eq!(err.kind(), "MetadataParseError");
        assert_eq!(err.position().map(|p| p.line), Some(3));
    }

    #[test]
    fn test_truncated_document() {
        let dmr = "<Dataset name=\"d\">\n  <Int32 name=\"v\">";
        let err = parse_dmr(dmr).unwrap_err();
        assert!(matches!(err, DapError::MetadataParse { .. }));
    }

    #[test]
    fn test_mismatched_tags() {
        let dmr = "<Dataset name=\"d\"><Int32 name=\"v\"></Float32></Dataset>";
        assert!(matches!(parse_dmr(dmr), Err(DapError::MetadataParse { .. })));
    }

    #[test]
    fn test_duplicate_variable() {
        let dmr = r#"<Dataset name="d"><Int32 name="v"/><Int16 name="v"/></Dataset>"#;
        assert!(matches!(parse_dmr(dmr), Err(DapError::MetadataParse { .. })));
    }

    #[test]
    fn test_value_attribute_form() {
        let dmr = r#"<Dataset name="d"><Attribute name="n" type="Int32" value="7"/></Dataset>"#;
        let ds = parse_dmr(dmr).unwrap();
        assert_eq!(ds.attributes().get("n").and_then(|v| v.first_f64()), Some(7.0));
    }

    #[test]
    fn test_round_trip() {
        let first = parse_dmr(fixtures::FULL_DMR).unwrap();
        let second = parse_dmr(&to_dmr(&first)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolve_walks_up_the_groups() {
        let known = ["/a/x", "/y"];
        let exists = |k: &str| known.contains(&k);
        assert_eq!(resolve("x", "/a/b", exists).as_deref(), Some("/a/x"));
        assert_eq!(resolve("y", "/a/b", exists).as_deref(), Some("/y"));
        assert_eq!(resolve("/a/x", "/a/b", exists).as_deref(), Some("/a/x"));
        assert_eq!(resolve("/a/x", "", exists), None);
        assert_eq!(resolve("z", "/a", exists), None);
    }

    #[test]
    fn test_absolute_dimension_outside_group_chain() {
        let dmr = r#"<Dataset name="d">
  <Group name="a"><Dimension name="n" size="2"/></Group>
  <Group name="b"><Int32 name="v"><Dim name="/a/n"/></Int32></Group>
</Dataset>"#;
        let err = parse_dmr(dmr).unwrap_err();
        assert_eq!(err.kind(), "MetadataParseError");
    }

    #[test]
    fn test_overflowing_anonymous_dimensions() {
        let dmr = r#"<Dataset name="d"><Int32 name="v"><Dim size="4294967296"/><Dim size="4294967296"/><Dim size="4294967296"/></Int32></Dataset>"#;
        assert!(matches!(parse_dmr(dmr), Err(DapError::MetadataParse { .. })));
    }
}
