//! DDS (Dataset Descriptor Structure) parsing and serialization.
//!
//! ```text
//! Dataset {
//!     Float32 SST[TIME = 12][Y = 90][X = 180];
//!     Grid {
//!       Array:
//!         Int16 z[lat = 2];
//!       Maps:
//!         Float64 lat[lat = 2];
//!     } g;
//! } example;
//! ```

use tracing::{debug, warn};

use dap_model::{
    DapError, DapResult, DataType, Dataset, Dim, Grid, Group, Leaf, Node, Protocol, Sequence,
    Structure, Variable,
};

use crate::lexer::{Token, TokenCursor};

/// Parse a DDS document into a dataset tree.
///
/// DAP4-only container declarations (`Group`) are dropped with a warning;
/// DAP4-only atomic types (`Int64`, `UInt8`, ...) fail the whole parse with
/// a [`DapError::Protocol`].
pub fn parse_dds(text: &str) -> DapResult<Dataset> {
    let mut parser = DdsParser {
        cursor: TokenCursor::new(text)?,
    };
    parser.parse_dataset()
}

struct DdsParser<'a> {
    cursor: TokenCursor<'a>,
}

impl<'a> DdsParser<'a> {
    fn parse_dataset(&mut self) -> DapResult<Dataset> {
        self.cursor.expect_keyword("Dataset")?;
        self.cursor.expect_punct('{')?;
        let children = self.parse_declarations()?;
        self.cursor.expect_punct('}')?;
        let name_offset = self.cursor.offset();
        let name = self.cursor.expect_word("dataset name")?;
        self.cursor.expect_punct(';')?;
        if !self.cursor.is_at_end() {
            return Err(self.cursor.error(format!(
                "unexpected {} after the dataset declaration",
                self.cursor.describe_next()
            )));
        }

        let mut root = Group::new(name);
        for (node, offset) in children {
            root.add(node).map_err(|e| self.locate(e, offset))?;
        }
        let dataset = Dataset::new(Protocol::Dap2, root).map_err(|e| self.locate(e, name_offset))?;
        debug!(dataset = %dataset.name(), variables = dataset.children().len(), "Parsed DDS");
        Ok(dataset)
    }

    /// Declarations up to (not including) the closing brace.
    fn parse_declarations(&mut self) -> DapResult<Vec<(Node, usize)>> {
        let mut out = Vec::new();
        loop {
            if self.cursor.is_punct('}') {
                return Ok(out);
            }
            if self.cursor.is_at_end() {
                return Err(self.cursor.error("unexpected end of input, expected '}'"));
            }
            let offset = self.cursor.offset();
            if let Some(node) = self.parse_declaration()? {
                out.push((node, offset));
            }
        }
    }

    fn parse_declaration(&mut self) -> DapResult<Option<Node>> {
        let offset = self.cursor.offset();
        let keyword = self.cursor.expect_word("a type keyword")?;

        match keyword.to_ascii_lowercase().as_str() {
            "structure" => {
                let children = self.parse_block()?;
                let name = self.parse_constructor_name("Structure")?;
                let mut structure = Structure::new(name);
                for (node, child_offset) in children {
                    structure.add(node).map_err(|e| self.locate(e, child_offset))?;
                }
                Ok(Some(structure.into()))
            }
            "sequence" => {
                let children = self.parse_block()?;
                let name = self.parse_constructor_name("Sequence")?;
                let mut sequence = Sequence::new(name);
                for (node, child_offset) in children {
                    sequence.add(node).map_err(|e| self.locate(e, child_offset))?;
                }
                Ok(Some(sequence.into()))
            }
            "grid" => self.parse_grid(offset).map(|g| Some(g.into())),
            "group" => {
                self.skip_block()?;
                let name = self.cursor.expect_word("group name")?;
                self.cursor.expect_punct(';')?;
                warn!(group = %name, "Dropping Group declaration: DAP2 has no group model");
                Ok(None)
            }
            _ => self.parse_leaf_after_type(keyword, offset).map(|l| Some(l.into())),
        }
    }

    fn parse_leaf(&mut self) -> DapResult<Leaf> {
        let offset = self.cursor.offset();
        let keyword = self.cursor.expect_word("a type keyword")?;
        self.parse_leaf_after_type(keyword, offset)
    }

    fn parse_leaf_after_type(&mut self, keyword: &str, offset: usize) -> DapResult<Leaf> {
        let dtype = match DataType::from_name(keyword) {
            Some(t) if t.is_dap2() => t,
            Some(t) => {
                let pos = dap_model::SourcePosition::from_offset(self.text(), offset);
                return Err(DapError::protocol(format!(
                    "type {} at {} cannot be expressed in a DAP2 DDS",
                    t, pos
                )));
            }
            None => {
                return Err(self
                    .cursor
                    .error_at(format!("unknown type '{}'", keyword), offset))
            }
        };
        let name = self.cursor.expect_word("variable name")?;
        let dims = self.parse_dims()?;
        self.cursor.expect_punct(';')?;
        Ok(Leaf::new(name, dtype, dims))
    }

    fn parse_grid(&mut self, offset: usize) -> DapResult<Grid> {
        self.cursor.expect_punct('{')?;
        self.expect_section("Array")?;
        let array = self.parse_leaf()?;
        self.expect_section("Maps")?;
        let mut maps = Vec::new();
        while !self.cursor.is_punct('}') {
            if self.cursor.is_at_end() {
                return Err(self.cursor.error("unexpected end of input inside Grid"));
            }
            maps.push(self.parse_leaf()?);
        }
        self.cursor.expect_punct('}')?;
        let name = self.cursor.expect_word("grid name")?;
        self.cursor.expect_punct(';')?;
        Grid::new(name, array, maps).map_err(|e| self.locate(e, offset))
    }

    /// `Array:` / `Maps:`, with or without a space before the colon.
    fn expect_section(&mut self, label: &str) -> DapResult<()> {
        if self.cursor.eat_keyword(&format!("{}:", label)) {
            return Ok(());
        }
        self.cursor.expect_keyword(label)?;
        self.cursor.expect_keyword(":")
    }

    fn parse_block(&mut self) -> DapResult<Vec<(Node, usize)>> {
        self.cursor.expect_punct('{')?;
        let children = self.parse_declarations()?;
        self.cursor.expect_punct('}')?;
        Ok(children)
    }

    fn parse_constructor_name(&mut self, kind: &str) -> DapResult<&'a str> {
        let name = self.cursor.expect_word("variable name")?;
        if self.cursor.is_punct('[') {
            return Err(self
                .cursor
                .error(format!("dimensions on a {} declaration are not supported", kind)));
        }
        self.cursor.expect_punct(';')?;
        Ok(name)
    }

    fn parse_dims(&mut self) -> DapResult<Vec<Dim>> {
        let mut dims = Vec::new();
        let mut elements = 1usize;
        while self.cursor.eat_punct('[') {
            let named = matches!(self.cursor.peek_second(), Some(Token::Punct('=')));
            let name = if named {
                let name = self.cursor.expect_word("dimension name")?;
                self.cursor.expect_punct('=')?;
                Some(name)
            } else {
                None
            };
            let size_offset = self.cursor.offset();
            let raw = self.cursor.expect_word("dimension size")?;
            let size = raw.parse::<usize>().map_err(|_| {
                self.cursor
                    .error_at(format!("invalid dimension size '{}'", raw), size_offset)
            })?;
            elements = elements.checked_mul(size).ok_or_else(|| {
                self.cursor
                    .error_at(format!("dimension size {} overflows the element count", size), size_offset)
            })?;
            self.cursor.expect_punct(']')?;
            dims.push(match name {
                Some(name) => Dim::named(name, size),
                None => Dim::anonymous(size),
            });
        }
        Ok(dims)
    }

    /// Skip a balanced `{ ... }` block without interpreting it.
    fn skip_block(&mut self) -> DapResult<()> {
        self.cursor.expect_punct('{')?;
        let mut depth = 1usize;
        while depth > 0 {
            match self.cursor.next_token() {
                Some(Token::Punct('{')) => depth += 1,
                Some(Token::Punct('}')) => depth -= 1,
                Some(_) => {}
                None => return Err(self.cursor.error("unexpected end of input, expected '}'")),
            }
        }
        Ok(())
    }

    fn text(&self) -> &'a str {
        self.cursor.text()
    }

    /// Model violations found while assembling the tree are metadata errors.
    fn locate(&self, err: DapError, offset: usize) -> DapError {
        match err {
            DapError::Model(message) => self.cursor.error_at(message, offset),
            other => other,
        }
    }
}

/// Serialize a DAP2 dataset back into DDS text.
///
/// Fails with [`DapError::Protocol`] when the tree holds something the
/// legacy grammar cannot express (groups, DAP4-only types).
pub fn to_dds(dataset: &Dataset) -> DapResult<String> {
    let mut out = String::from("Dataset {\n");
    for node in dataset.children() {
        write_node(&mut out, node, 1)?;
    }
    out.push_str(&format!("}} {};\n", dataset.name()));
    Ok(out)
}

fn write_node(out: &mut String, node: &Node, depth: usize) -> DapResult<()> {
    let indent = "    ".repeat(depth);
    match node {
        Node::Leaf(leaf) => write_leaf(out, leaf, depth),
        Node::Structure(s) => {
            out.push_str(&format!("{}Structure {{\n", indent));
            for child in s.members() {
                write_node(out, child, depth + 1)?;
            }
            out.push_str(&format!("{}}} {};\n", indent, s.name()));
            Ok(())
        }
        Node::Sequence(s) => {
            out.push_str(&format!("{}Sequence {{\n", indent));
            for child in s.columns() {
                write_node(out, child, depth + 1)?;
            }
            out.push_str(&format!("{}}} {};\n", indent, s.name()));
            Ok(())
        }
        Node::Grid(g) => {
            out.push_str(&format!("{}Grid {{\n", indent));
            out.push_str(&format!("{}  Array:\n", indent));
            write_leaf(out, g.array(), depth + 1)?;
            out.push_str(&format!("{}  Maps:\n", indent));
            for map in g.maps() {
                write_leaf(out, map, depth + 1)?;
            }
            out.push_str(&format!("{}}} {};\n", indent, g.name()));
            Ok(())
        }
        Node::Group(g) => Err(DapError::protocol(format!(
            "group '{}' cannot be expressed in a DAP2 DDS",
            g.fqn()
        ))),
    }
}

fn write_leaf(out: &mut String, leaf: &Leaf, depth: usize) -> DapResult<()> {
    let keyword = leaf.data_type().dap2_name().ok_or_else(|| {
        DapError::protocol(format!(
            "variable '{}' of type {} cannot be expressed in a DAP2 DDS",
            leaf.fqn(),
            leaf.data_type()
        ))
    })?;
    out.push_str(&format!(
        "{}{} {}{};\n",
        "    ".repeat(depth),
        keyword,
        leaf.name(),
        format_dims(leaf.dims())
    ));
    Ok(())
}

/// `[name = size]` / `[size]` suffixes.
pub fn format_dims(dims: &[Dim]) -> String {
    dims.iter()
        .map(|d| match &d.name {
            Some(name) => format!("[{} = {}]", name, d.size),
            None => format!("[{}]", d.size),
        })
        .collect()
}
