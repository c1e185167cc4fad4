//! Dataset tree nodes.
//!
//! The five node kinds form a closed set ([`Node`]); the read-only view
//! shared by all of them is the [`Variable`] trait. Names are stored
//! escaped (see [`crate::escape`]), so a node's name is also its key in the
//! parent container.

use crate::attributes::Attributes;
use crate::dtype::{DataType, Protocol};
use crate::error::{DapError, DapResult};
use crate::escape::{escape_name, unescape_name};
use crate::value::{ArrayData, Record};

/// Discriminant of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Structure,
    Sequence,
    Grid,
    Group,
    Dataset,
}

/// Capabilities shared by every node of a dataset tree.
pub trait Variable {
    /// Escaped local name (also the key in the parent container).
    fn name(&self) -> &str;
    /// Fully qualified name from the dataset root.
    fn fqn(&self) -> &str;
    fn attributes(&self) -> &Attributes;
    fn kind(&self) -> NodeKind;
    fn shape(&self) -> Vec<usize>;
    fn dtype(&self) -> Option<DataType> {
        None
    }
    fn children(&self) -> Vec<&dyn Variable> {
        Vec::new()
    }
}

/// One axis of a variable: its extent and, when shared, the dimension
/// name (plain for DAP2, fully qualified for DAP4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dim {
    pub name: Option<String>,
    pub size: usize,
}

impl Dim {
    pub fn named(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: Some(name.into()),
            size,
        }
    }

    pub fn anonymous(size: usize) -> Self {
        Self { name: None, size }
    }
}

/// A shared dimension declared by a DAP4 group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    name: String,
    fqn: String,
    pub size: usize,
}

impl Dimension {
    pub fn new(name: &str, size: usize) -> Self {
        Self {
            name: escape_name(name),
            fqn: String::new(),
            size,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fqn(&self) -> &str {
        &self.fqn
    }

    pub(crate) fn set_fqn(&mut self, fqn: String) {
        self.fqn = fqn;
    }
}

/// A DAP4 enumeration definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Enumeration {
    name: String,
    fqn: String,
    pub base: DataType,
    pub constants: Vec<(String, i64)>,
}

impl Enumeration {
    pub fn new(name: &str, base: DataType) -> Self {
        Self {
            name: escape_name(name),
            fqn: String::new(),
            base,
            constants: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fqn(&self) -> &str {
        &self.fqn
    }

    /// Label of a decoded value, if it is one of the declared constants.
    pub fn label(&self, value: i64) -> Option<&str> {
        self.constants
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(k, _)| k.as_str())
    }

    pub(crate) fn set_fqn(&mut self, fqn: String) {
        self.fqn = fqn;
    }
}

/// Where a lazily loaded variable lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSource {
    pub base_url: String,
    pub protocol: Protocol,
}

/// State of a leaf: never both remote and materialized.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Content {
    #[default]
    Unmaterialized,
    Remote(RemoteSource),
    Data(ArrayData),
}

/// A scalar or N-dimensional array of one atomic type.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    name: String,
    fqn: String,
    pub attributes: Attributes,
    dtype: DataType,
    storage: DataType,
    enumeration: Option<String>,
    dims: Vec<Dim>,
    maps: Vec<String>,
    content: Content,
}

impl Leaf {
    pub fn new(name: &str, dtype: DataType, dims: Vec<Dim>) -> Self {
        Self {
            name: escape_name(name),
            fqn: String::new(),
            attributes: Attributes::new(),
            dtype,
            storage: dtype,
            enumeration: None,
            dims,
            maps: Vec::new(),
            content: Content::Unmaterialized,
        }
    }

    /// An enum-typed leaf; values are stored and decoded as `base`.
    pub fn enumerated(name: &str, enumeration: impl Into<String>, base: DataType, dims: Vec<Dim>) -> Self {
        Self {
            storage: base,
            enumeration: Some(enumeration.into()),
            ..Self::new(name, DataType::Enum, dims)
        }
    }

    /// Attach DAP4 `<Map>` references.
    pub fn with_maps(mut self, maps: Vec<String>) -> Self {
        self.maps = maps;
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn display_name(&self) -> String {
        unescape_name(&self.name)
    }

    /// Declared element type (`Enum` for enumerated leaves).
    pub fn data_type(&self) -> DataType {
        self.dtype
    }

    /// Element type used on the wire (the base type for enums).
    pub fn storage_type(&self) -> DataType {
        self.storage
    }

    pub fn enumeration(&self) -> Option<&str> {
        self.enumeration.as_deref()
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn maps(&self) -> &[String] {
        &self.maps
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Number of elements implied by the declared shape, saturating at
    /// `usize::MAX`.
    pub fn size(&self) -> usize {
        self.checked_size().unwrap_or(usize::MAX)
    }

    /// Number of elements, or `None` when the shape overflows `usize`.
    pub fn checked_size(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |acc, d| acc.checked_mul(d.size))
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn data(&self) -> Option<&ArrayData> {
        match &self.content {
            Content::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<ArrayData> {
        match self.content {
            Content::Data(d) => Some(d),
            _ => None,
        }
    }

    /// Move the data out, leaving the leaf unmaterialized.
    pub fn take_data(&mut self) -> Option<ArrayData> {
        match std::mem::take(&mut self.content) {
            Content::Data(d) => Some(d),
            other => {
                self.content = other;
                None
            }
        }
    }

    pub fn remote(&self) -> Option<&RemoteSource> {
        match &self.content {
            Content::Remote(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_materialized(&self) -> bool {
        matches!(self.content, Content::Data(_))
    }

    /// Bind the leaf to a remote location, replacing any data.
    pub fn bind_remote(&mut self, source: RemoteSource) {
        self.content = Content::Remote(source);
    }

    /// Store decoded data, checking it against the declared shape and type.
    pub fn set_data(&mut self, data: ArrayData) -> DapResult<()> {
        self.check_data(&data)?;
        self.content = Content::Data(data);
        Ok(())
    }

    /// A fresh leaf with narrowed dimensions and no content.
    pub fn with_dims(&self, dims: Vec<Dim>) -> Leaf {
        Leaf {
            dims,
            content: Content::Unmaterialized,
            ..self.clone()
        }
    }

    /// A fresh materialized leaf with the given shape and data.
    ///
    /// The original node is left untouched; a decoded element count that
    /// disagrees with `dims` is a [`DapError::ShapeMismatch`].
    pub fn materialize(&self, dims: Vec<Dim>, data: ArrayData) -> DapResult<Leaf> {
        let mut leaf = self.with_dims(dims);
        leaf.set_data(data)?;
        Ok(leaf)
    }

    fn check_data(&self, data: &ArrayData) -> DapResult<()> {
        let expected = self.size();
        if data.len() != expected {
            return Err(DapError::ShapeMismatch {
                variable: self.fqn_or_name().to_string(),
                expected,
                actual: data.len(),
            });
        }
        let template = ArrayData::with_capacity(self.storage, 0);
        if std::mem::discriminant(&template) != std::mem::discriminant(data) {
            return Err(DapError::model(format!(
                "data for '{}' does not match its declared type {}",
                self.fqn_or_name(),
                self.storage
            )));
        }
        Ok(())
    }

    fn fqn_or_name(&self) -> &str {
        if self.fqn.is_empty() {
            &self.name
        } else {
            &self.fqn
        }
    }

    pub(crate) fn set_fqn(&mut self, fqn: String) {
        self.fqn = fqn;
    }
}

/// An ordered container of named children.
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    name: String,
    fqn: String,
    pub attributes: Attributes,
    dims: Vec<Dim>,
    children: Vec<Node>,
}

impl Structure {
    pub fn new(name: &str) -> Self {
        Self {
            name: escape_name(name),
            fqn: String::new(),
            attributes: Attributes::new(),
            dims: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Dimensions of an array of structures (DAP4 only).
    pub fn with_dims(mut self, dims: Vec<Dim>) -> Self {
        self.dims = dims;
        self
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn add(&mut self, child: Node) -> DapResult<()> {
        push_child(&mut self.children, child, &self.name)
    }

    pub fn members(&self) -> &[Node] {
        &self.children
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        get_child(&self.children, name)
    }
}

/// A table of records, one value per child per record.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    name: String,
    fqn: String,
    pub attributes: Attributes,
    children: Vec<Node>,
    records: Option<Vec<Record>>,
    source: Option<RemoteSource>,
}

impl Sequence {
    pub fn new(name: &str) -> Self {
        Self {
            name: escape_name(name),
            fqn: String::new(),
            attributes: Attributes::new(),
            children: Vec::new(),
            records: None,
            source: None,
        }
    }

    pub fn add(&mut self, child: Node) -> DapResult<()> {
        push_child(&mut self.children, child, &self.name)
    }

    pub fn columns(&self) -> &[Node] {
        &self.children
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        get_child(&self.children, name)
    }

    /// Position of a column by escaped name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.children.iter().position(|c| c.name() == name)
    }

    pub fn records(&self) -> Option<&[Record]> {
        self.records.as_deref()
    }

    pub fn remote(&self) -> Option<&RemoteSource> {
        self.source.as_ref()
    }

    pub fn bind_remote(&mut self, source: RemoteSource) {
        self.records = None;
        self.source = Some(source);
    }

    /// Store decoded records; each record must carry one value per column.
    pub fn set_records(&mut self, records: Vec<Record>) -> DapResult<()> {
        let width = self.children.len();
        if let Some(bad) = records.iter().find(|r| r.len() != width) {
            return Err(DapError::ShapeMismatch {
                variable: self.fqn.clone(),
                expected: width,
                actual: bad.len(),
            });
        }
        self.source = None;
        self.records = Some(records);
        Ok(())
    }

    /// A fresh sequence keeping only the named columns, in the given order.
    pub fn project(&self, columns: &[&str]) -> DapResult<Sequence> {
        let mut projected = Sequence {
            children: Vec::with_capacity(columns.len()),
            records: None,
            ..self.clone()
        };
        for name in columns {
            let child = self
                .get(name)
                .ok_or_else(|| DapError::invalid_slice(format!("sequence '{}' has no column '{}'", self.fqn, name)))?;
            projected.children.push(child.clone());
        }
        Ok(projected)
    }
}

/// A DAP2 array with one coordinate map per axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    name: String,
    fqn: String,
    pub attributes: Attributes,
    array: Leaf,
    maps: Vec<Leaf>,
}

impl Grid {
    /// Build a grid, checking that there is one 1-D map per array axis
    /// and that each map's length matches its axis.
    pub fn new(name: &str, array: Leaf, maps: Vec<Leaf>) -> DapResult<Self> {
        if maps.len() != array.rank() {
            return Err(DapError::model(format!(
                "grid '{}' has {} maps for an array of rank {}",
                name,
                maps.len(),
                array.rank()
            )));
        }
        for (axis, (map, dim)) in maps.iter().zip(array.dims()).enumerate() {
            if map.rank() != 1 || map.dims()[0].size != dim.size {
                return Err(DapError::model(format!(
                    "grid '{}' map '{}' does not match axis {} (extent {})",
                    name,
                    map.name(),
                    axis,
                    dim.size
                )));
            }
        }
        let mut names = vec![array.name()];
        for map in &maps {
            if names.contains(&map.name()) {
                return Err(DapError::model(format!(
                    "grid '{}' declares '{}' twice",
                    name,
                    map.name()
                )));
            }
            names.push(map.name());
        }
        Ok(Self {
            name: escape_name(name),
            fqn: String::new(),
            attributes: Attributes::new(),
            array,
            maps,
        })
    }

    pub fn array(&self) -> &Leaf {
        &self.array
    }

    pub fn maps(&self) -> &[Leaf] {
        &self.maps
    }

    /// Number of member variables: the array plus its maps.
    pub fn len(&self) -> usize {
        1 + self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn array_mut(&mut self) -> &mut Leaf {
        &mut self.array
    }

    pub fn maps_mut(&mut self) -> &mut [Leaf] {
        &mut self.maps
    }

    /// A grid with this grid's identity built from sliced members.
    pub fn with_members(&self, array: Leaf, maps: Vec<Leaf>) -> DapResult<Grid> {
        let mut grid = Grid::new(&self.name, array, maps)?;
        grid.name = self.name.clone();
        grid.fqn = self.fqn.clone();
        grid.attributes = self.attributes.clone();
        Ok(grid)
    }

    /// Member leaf by escaped name.
    pub fn member(&self, name: &str) -> Option<&Leaf> {
        std::iter::once(&self.array)
            .chain(self.maps.iter())
            .find(|l| l.name() == name)
    }
}

/// A DAP4 group: a container that also scopes dimensions and enumerations.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    name: String,
    fqn: String,
    pub attributes: Attributes,
    dimensions: Vec<Dimension>,
    enumerations: Vec<Enumeration>,
    children: Vec<Node>,
}

impl Group {
    pub fn new(name: &str) -> Self {
        Self {
            name: escape_name(name),
            fqn: String::new(),
            attributes: Attributes::new(),
            dimensions: Vec::new(),
            enumerations: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn add(&mut self, child: Node) -> DapResult<()> {
        push_child(&mut self.children, child, &self.name)
    }

    pub fn add_dimension(&mut self, dim: Dimension) -> DapResult<()> {
        if self.dimension(dim.name()).is_some() {
            return Err(DapError::model(format!(
                "dimension '{}' declared twice in group '{}'",
                dim.name(),
                self.name
            )));
        }
        self.dimensions.push(dim);
        Ok(())
    }

    pub fn add_enumeration(&mut self, enumeration: Enumeration) -> DapResult<()> {
        if self.enumeration(enumeration.name()).is_some() {
            return Err(DapError::model(format!(
                "enumeration '{}' declared twice in group '{}'",
                enumeration.name(),
                self.name
            )));
        }
        self.enumerations.push(enumeration);
        Ok(())
    }

    pub fn members(&self) -> &[Node] {
        &self.children
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        get_child(&self.children, name)
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name() == name)
    }

    pub fn dimension_mut(&mut self, name: &str) -> Option<&mut Dimension> {
        self.dimensions.iter_mut().find(|d| d.name() == name)
    }

    pub fn enumerations(&self) -> &[Enumeration] {
        &self.enumerations
    }

    pub fn enumeration(&self, name: &str) -> Option<&Enumeration> {
        self.enumerations.iter().find(|e| e.name() == name)
    }

    pub(crate) fn members_mut(&mut self) -> &mut Vec<Node> {
        &mut self.children
    }

    pub(crate) fn dimensions_mut(&mut self) -> &mut Vec<Dimension> {
        &mut self.dimensions
    }

    pub(crate) fn enumerations_mut(&mut self) -> &mut Vec<Enumeration> {
        &mut self.enumerations
    }

    pub(crate) fn set_fqn(&mut self, fqn: String) {
        self.fqn = fqn;
    }

}

/// A node of the dataset tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Leaf),
    Structure(Structure),
    Sequence(Sequence),
    Grid(Grid),
    Group(Group),
}

impl Node {
    pub fn as_leaf(&self) -> Option<&Leaf> {
        match self {
            Node::Leaf(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&Sequence> {
        match self {
            Node::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_structure(&self) -> Option<&Structure> {
        match self {
            Node::Structure(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_grid(&self) -> Option<&Grid> {
        match self {
            Node::Grid(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Node::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        match self {
            Node::Leaf(n) => &mut n.attributes,
            Node::Structure(n) => &mut n.attributes,
            Node::Sequence(n) => &mut n.attributes,
            Node::Grid(n) => &mut n.attributes,
            Node::Group(n) => &mut n.attributes,
        }
    }

    /// Child nodes of containers. Grid members are leaves, not nodes, and
    /// are reached through [`Grid::array`]/[`Grid::maps`].
    pub fn members(&self) -> &[Node] {
        match self {
            Node::Structure(s) => &s.children,
            Node::Sequence(s) => &s.children,
            Node::Group(g) => &g.children,
            Node::Leaf(_) | Node::Grid(_) => &[],
        }
    }

    pub(crate) fn members_mut(&mut self) -> Option<&mut Vec<Node>> {
        match self {
            Node::Structure(s) => Some(&mut s.children),
            Node::Sequence(s) => Some(&mut s.children),
            Node::Group(g) => Some(&mut g.children),
            Node::Leaf(_) | Node::Grid(_) => None,
        }
    }

    pub(crate) fn set_fqn(&mut self, fqn: String) {
        match self {
            Node::Leaf(n) => n.fqn = fqn,
            Node::Structure(n) => n.fqn = fqn,
            Node::Sequence(n) => n.fqn = fqn,
            Node::Grid(n) => n.fqn = fqn,
            Node::Group(n) => n.fqn = fqn,
        }
    }

    fn as_variable(&self) -> &dyn Variable {
        match self {
            Node::Leaf(n) => n,
            Node::Structure(n) => n,
            Node::Sequence(n) => n,
            Node::Grid(n) => n,
            Node::Group(n) => n,
        }
    }
}

impl From<Leaf> for Node {
    fn from(v: Leaf) -> Self {
        Node::Leaf(v)
    }
}

impl From<Structure> for Node {
    fn from(v: Structure) -> Self {
        Node::Structure(v)
    }
}

impl From<Sequence> for Node {
    fn from(v: Sequence) -> Self {
        Node::Sequence(v)
    }
}

impl From<Grid> for Node {
    fn from(v: Grid) -> Self {
        Node::Grid(v)
    }
}

impl From<Group> for Node {
    fn from(v: Group) -> Self {
        Node::Group(v)
    }
}

fn push_child(children: &mut Vec<Node>, child: Node, parent: &str) -> DapResult<()> {
    if children.iter().any(|c| c.name() == child.name()) {
        return Err(DapError::model(format!(
            "duplicate name '{}' in '{}'",
            child.name(),
            parent
        )));
    }
    children.push(child);
    Ok(())
}

fn get_child<'a>(children: &'a [Node], name: &str) -> Option<&'a Node> {
    children.iter().find(|c| c.name() == name)
}

impl Variable for Leaf {
    fn name(&self) -> &str {
        &self.name
    }
    fn fqn(&self) -> &str {
        &self.fqn
    }
    fn attributes(&self) -> &Attributes {
        &self.attributes
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Leaf
    }
    fn shape(&self) -> Vec<usize> {
        self.dims.iter().map(|d| d.size).collect()
    }
    fn dtype(&self) -> Option<DataType> {
        Some(self.dtype)
    }
}

impl Variable for Structure {
    fn name(&self) -> &str {
        &self.name
    }
    fn fqn(&self) -> &str {
        &self.fqn
    }
    fn attributes(&self) -> &Attributes {
        &self.attributes
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Structure
    }
    fn shape(&self) -> Vec<usize> {
        self.dims.iter().map(|d| d.size).collect()
    }
    fn children(&self) -> Vec<&dyn Variable> {
        self.children.iter().map(Node::as_variable).collect()
    }
}

impl Variable for Sequence {
    fn name(&self) -> &str {
        &self.name
    }
    fn fqn(&self) -> &str {
        &self.fqn
    }
    fn attributes(&self) -> &Attributes {
        &self.attributes
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Sequence
    }
    fn shape(&self) -> Vec<usize> {
        match &self.records {
            Some(records) => vec![records.len()],
            None => Vec::new(),
        }
    }
    fn children(&self) -> Vec<&dyn Variable> {
        self.children.iter().map(Node::as_variable).collect()
    }
}

impl Variable for Grid {
    fn name(&self) -> &str {
        &self.name
    }
    fn fqn(&self) -> &str {
        &self.fqn
    }
    fn attributes(&self) -> &Attributes {
        &self.attributes
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Grid
    }
    fn shape(&self) -> Vec<usize> {
        self.array.shape()
    }
    fn dtype(&self) -> Option<DataType> {
        Some(self.array.dtype)
    }
    fn children(&self) -> Vec<&dyn Variable> {
        let mut out: Vec<&dyn Variable> = vec![&self.array];
        out.extend(self.maps.iter().map(|m| m as &dyn Variable));
        out
    }
}

impl Variable for Group {
    fn name(&self) -> &str {
        &self.name
    }
    fn fqn(&self) -> &str {
        &self.fqn
    }
    fn attributes(&self) -> &Attributes {
        &self.attributes
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Group
    }
    fn shape(&self) -> Vec<usize> {
        Vec::new()
    }
    fn children(&self) -> Vec<&dyn Variable> {
        self.children.iter().map(Node::as_variable).collect()
    }
}

impl Variable for Node {
    fn name(&self) -> &str {
        self.as_variable().name()
    }
    fn fqn(&self) -> &str {
        self.as_variable().fqn()
    }
    fn attributes(&self) -> &Attributes {
        self.as_variable().attributes()
    }
    fn kind(&self) -> NodeKind {
        self.as_variable().kind()
    }
    fn shape(&self) -> Vec<usize> {
        self.as_variable().shape()
    }
    fn dtype(&self) -> Option<DataType> {
        self.as_variable().dtype()
    }
    fn children(&self) -> Vec<&dyn Variable> {
        self.as_variable().children()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(name: &str, n: usize) -> Leaf {
        Leaf::new(name, DataType::Float64, vec![Dim::named(name, n)])
    }

    #[test]
    fn test_names_are_escaped() {
        let leaf = Leaf::new("air temp", DataType::Float32, vec![]);
        assert_eq!(leaf.name(), "air%20temp");
        assert_eq!(leaf.display_name(), "air temp");
    }

    #[test]
    fn test_duplicate_sibling_rejected() {
        let mut s = Structure::new("s");
        s.add(Leaf::new("a", DataType::Int32, vec![]).into()).unwrap();
        let err = s.add(Leaf::new("a", DataType::Int16, vec![]).into()).unwrap_err();
        assert!(matches!(err, DapError::Model(_)));
        assert_eq!(s.members().len(), 1);
    }

    #[test]
    fn test_grid_validation() {
        let array = Leaf::new(
            "SST",
            DataType::Float32,
            vec![Dim::named("lat", 3), Dim::named("lon", 4)],
        );
        let grid = Grid::new("SST", array.clone(), vec![axis("lat", 3), axis("lon", 4)]).unwrap();
        assert_eq!(grid.len(), 1 + array.rank());
        assert_eq!(grid.shape(), vec![3, 4]);
        assert_eq!(grid.children().len(), 3);

        // Wrong map count
        assert!(Grid::new("SST", array.clone(), vec![axis("lat", 3)]).is_err());
        // Wrong map length
        assert!(Grid::new("SST", array, vec![axis("lat", 3), axis("lon", 5)]).is_err());
    }

    #[test]
    fn test_set_data_checks_shape_and_type() {
        let mut leaf = Leaf::new("x", DataType::Int16, vec![Dim::anonymous(3)]);
        let err = leaf.set_data(ArrayData::I16(vec![1, 2])).unwrap_err();
        assert!(matches!(err, DapError::ShapeMismatch { expected: 3, actual: 2, .. }));
        assert!(leaf.set_data(ArrayData::I32(vec![1, 2, 3])).is_err());
        leaf.set_data(ArrayData::I16(vec![1, 2, 3])).unwrap();
        assert!(leaf.is_materialized());
    }

    #[test]
    fn test_size_never_wraps() {
        let huge = usize::MAX / 2;
        let leaf = Leaf::new("x", DataType::Int32, vec![Dim::anonymous(huge), Dim::anonymous(4)]);
        assert_eq!(leaf.checked_size(), None);
        assert_eq!(leaf.size(), usize::MAX);
        assert_eq!(Leaf::new("s", DataType::Int32, vec![]).checked_size(), Some(1));
    }

    #[test]
    fn test_remote_and_data_are_exclusive() {
        let mut leaf = Leaf::new("x", DataType::Int32, vec![]);
        leaf.bind_remote(RemoteSource {
            base_url: "http://example.com/d".to_string(),
            protocol: Protocol::Dap2,
        });
        assert!(leaf.remote().is_some());
        leaf.set_data(ArrayData::I32(vec![7])).unwrap();
        assert!(leaf.remote().is_none());
        assert_eq!(leaf.data(), Some(&ArrayData::I32(vec![7])));
    }

    #[test]
    fn test_materialize_leaves_original_untouched() {
        let leaf = Leaf::new("x", DataType::Int32, vec![Dim::named("t", 10)]);
        let sliced = leaf
            .materialize(vec![Dim::named("t", 2)], ArrayData::I32(vec![1, 2]))
            .unwrap();
        assert_eq!(sliced.shape(), vec![2]);
        assert_eq!(leaf.shape(), vec![10]);
        assert!(!leaf.is_materialized());
    }

    #[test]
    fn test_enum_leaf_storage() {
        let leaf = Leaf::enumerated("flag", "/colors", DataType::UInt8, vec![]);
        assert_eq!(leaf.dtype(), Some(DataType::Enum));
        assert_eq!(leaf.storage_type(), DataType::UInt8);
        assert_eq!(leaf.enumeration(), Some("/colors"));
    }

    #[test]
    fn test_sequence_projection() {
        let mut seq = Sequence::new("cast");
        seq.add(Leaf::new("a", DataType::Int32, vec![]).into()).unwrap();
        seq.add(Leaf::new("b", DataType::Int16, vec![]).into()).unwrap();
        seq.add(Leaf::new("c", DataType::String, vec![]).into()).unwrap();
        let p = seq.project(&["c", "a"]).unwrap();
        let names: Vec<_> = p.columns().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["c", "a"]);
        assert!(seq.project(&["zzz"]).is_err());
    }
}
