//! The dataset root and tree-wide lookups.

use std::collections::HashMap;

use crate::attributes::Attributes;
use crate::dtype::Protocol;
use crate::error::{DapError, DapResult};
use crate::node::{
    Dimension, Enumeration, Grid, Group, Leaf, Node, NodeKind, RemoteSource, Sequence, Variable,
};
use crate::value::VariableData;

/// The unique root of a dataset tree.
///
/// A dataset owns its root group; for DAP2 trees the root group never
/// declares dimensions and never holds nested groups. Fully qualified names
/// are assigned once, when the dataset is constructed:
///
/// * DAP2: `var`, `struct.member`, `grid.map`
/// * DAP4: `/var`, `/group/var`, `/group/struct.member`
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    protocol: Protocol,
    root: Group,
    /// `dapVersion` declared by a DMR.
    pub dap_version: Option<String>,
    /// `dmrVersion` declared by a DMR.
    pub dmr_version: Option<String>,
}

impl Dataset {
    /// Finish a parsed tree: assign fully qualified names and validate it.
    pub fn new(protocol: Protocol, root: Group) -> DapResult<Self> {
        let mut dataset = Self {
            protocol,
            root,
            dap_version: None,
            dmr_version: None,
        };
        dataset.assign_fqns();
        dataset.validate()?;
        Ok(dataset)
    }

    pub fn name(&self) -> &str {
        self.root.name()
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn root(&self) -> &Group {
        &self.root
    }

    pub fn children(&self) -> &[Node] {
        self.root.members()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.root.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.root.attributes
    }

    /// Every node below the root, depth first in declaration order.
    pub fn walk(&self) -> Vec<&dyn Variable> {
        let mut out = Vec::new();
        for child in self.root.children() {
            walk_into(child, &mut out);
        }
        out
    }

    pub fn find(&self, fqn: &str) -> Option<&dyn Variable> {
        self.walk().into_iter().find(|v| v.fqn() == fqn)
    }

    /// Container node by fully qualified name (grid members are leaves,
    /// see [`Dataset::leaf`]).
    pub fn node(&self, fqn: &str) -> Option<&Node> {
        find_node(self.root.members(), fqn)
    }

    pub fn node_mut(&mut self, fqn: &str) -> Option<&mut Node> {
        find_node_mut(self.root.members_mut(), fqn)
    }

    /// Leaf by fully qualified name, including grid arrays and maps.
    pub fn leaf(&self, fqn: &str) -> Option<&Leaf> {
        find_leaf(self.root.members(), fqn)
    }

    pub fn leaf_mut(&mut self, fqn: &str) -> Option<&mut Leaf> {
        find_leaf_mut(self.root.members_mut(), fqn)
    }

    pub fn grid(&self, fqn: &str) -> Option<&Grid> {
        self.node(fqn).and_then(Node::as_grid)
    }

    pub fn sequence(&self, fqn: &str) -> Option<&Sequence> {
        self.node(fqn).and_then(Node::as_sequence)
    }

    pub fn sequence_mut(&mut self, fqn: &str) -> Option<&mut Sequence> {
        match self.node_mut(fqn) {
            Some(Node::Sequence(s)) => Some(s),
            _ => None,
        }
    }

    /// Group by fully qualified name; `/` (or the dataset name) is the root.
    pub fn group(&self, fqn: &str) -> Option<&Group> {
        if fqn == "/" || fqn == self.root.fqn() {
            return Some(&self.root);
        }
        self.node(fqn).and_then(Node::as_group)
    }

    /// Attribute map of any node (or of the dataset itself).
    pub fn attributes_of_mut(&mut self, fqn: &str) -> Option<&mut Attributes> {
        if fqn == self.root.fqn() || fqn == "/" {
            return Some(&mut self.root.attributes);
        }
        if self.node(fqn).is_some() {
            return self.node_mut(fqn).map(Node::attributes_mut);
        }
        self.leaf_mut(fqn).map(|l| &mut l.attributes)
    }

    /// Shared dimension by fully qualified name.
    pub fn dimension(&self, fqn: &str) -> Option<&Dimension> {
        self.dimensions().into_iter().find(|d| d.fqn() == fqn)
    }

    pub fn dimension_mut(&mut self, fqn: &str) -> Option<&mut Dimension> {
        find_dimension_mut(&mut self.root, fqn)
    }

    /// Every shared dimension, root group first.
    pub fn dimensions(&self) -> Vec<&Dimension> {
        self.groups().into_iter().flat_map(|g| g.dimensions()).collect()
    }

    pub fn enumeration(&self, fqn: &str) -> Option<&Enumeration> {
        self.groups()
            .into_iter()
            .flat_map(|g| g.enumerations())
            .find(|e| e.fqn() == fqn)
    }

    /// The root group followed by every nested group, depth first.
    pub fn groups(&self) -> Vec<&Group> {
        let mut out = Vec::new();
        collect_groups(&self.root, &mut out);
        out
    }

    /// Visit every leaf mutably, grid members included.
    pub fn for_each_leaf_mut<F: FnMut(&mut Leaf)>(&mut self, mut f: F) {
        visit_leaves(self.root.members_mut(), &mut f);
    }

    /// Visit every sequence mutably, nested sequences included.
    pub fn for_each_sequence_mut<F: FnMut(&mut Sequence)>(&mut self, mut f: F) {
        visit_sequences(self.root.members_mut(), &mut f);
    }

    /// Attach `source` to every lazily loadable variable: arrays outside
    /// sequences and outermost sequences. Nested sequences and sequence
    /// columns load with their parent.
    pub fn bind_remote(&mut self, source: &RemoteSource) {
        bind_nodes(self.root.members_mut(), source);
    }

    /// Store decoded data on the leaf or sequence named `fqn`.
    pub fn set_variable_data(&mut self, fqn: &str, data: VariableData) -> DapResult<()> {
        match data {
            VariableData::Array(array) => self
                .leaf_mut(fqn)
                .ok_or_else(|| DapError::model(format!("dataset has no array variable '{}'", fqn)))?
                .set_data(array),
            VariableData::Records(records) => self
                .sequence_mut(fqn)
                .ok_or_else(|| DapError::model(format!("dataset has no sequence '{}'", fqn)))?
                .set_records(records),
        }
    }

    fn assign_fqns(&mut self) {
        let name = self.root.name().to_string();
        self.root.set_fqn(name);
        let sep = match self.protocol {
            Protocol::Dap2 => '.',
            Protocol::Dap4 => '/',
        };
        assign_group(&mut self.root, "", sep);
    }

    fn validate(&self) -> DapResult<()> {
        for var in self.walk() {
            if let Some(leaf) = self.leaf(var.fqn()) {
                if leaf.checked_size().is_none() {
                    return Err(DapError::model(format!(
                        "variable '{}' declares more elements than can be addressed",
                        leaf.fqn()
                    )));
                }
            }
        }

        if self.protocol == Protocol::Dap2 {
            if !self.root.dimensions().is_empty() {
                return Err(DapError::model("DAP2 datasets cannot declare shared dimensions"));
            }
            if self.walk().iter().any(|v| v.kind() == NodeKind::Group) {
                return Err(DapError::model("DAP2 datasets cannot contain groups"));
            }
            return Ok(());
        }

        let declared: HashMap<&str, usize> = self.dimensions().into_iter().map(|d| (d.fqn(), d.size)).collect();
        for var in self.walk() {
            let Some(leaf) = self.leaf(var.fqn()) else {
                continue;
            };
            for dim in leaf.dims() {
                let Some(name) = &dim.name else { continue };
                let size = declared
                    .get(name.as_str())
                    .copied()
                    .filter(|_| in_scope(name, leaf.fqn()))
                    .ok_or_else(|| {
                        DapError::model(format!(
                            "variable '{}' references dimension '{}', which is not declared in its group or above",
                            leaf.fqn(),
                            name
                        ))
                    })?;
                if size != dim.size {
                    return Err(DapError::model(format!(
                        "variable '{}' uses dimension '{}' with extent {} but it is declared with {}",
                        leaf.fqn(),
                        name,
                        dim.size,
                        size
                    )));
                }
            }
            if let Some(enum_fqn) = leaf.enumeration() {
                if self.enumeration(enum_fqn).is_none() {
                    return Err(DapError::model(format!(
                        "variable '{}' references undeclared enumeration '{}'",
                        leaf.fqn(),
                        enum_fqn
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Whether the group owning `declaration` encloses the variable `fqn`.
pub fn in_scope(declaration: &str, fqn: &str) -> bool {
    let owner = declaration.rfind('/').map(|i| &declaration[..i]).unwrap_or("");
    let group = fqn.rfind('/').map(|i| &fqn[..i]).unwrap_or("");
    owner.is_empty() || group == owner || group.starts_with(&format!("{}/", owner))
}

impl Variable for Dataset {
    fn name(&self) -> &str {
        self.root.name()
    }
    fn fqn(&self) -> &str {
        self.root.fqn()
    }
    fn attributes(&self) -> &Attributes {
        &self.root.attributes
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Dataset
    }
    fn shape(&self) -> Vec<usize> {
        Vec::new()
    }
    fn children(&self) -> Vec<&dyn Variable> {
        self.root.children()
    }
}

fn join(prefix: &str, sep: char, name: &str) -> String {
    if sep == '/' {
        format!("{}/{}", prefix, name)
    } else if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn assign_group(group: &mut Group, path: &str, sep: char) {
    for dim in group.dimensions_mut() {
        let fqn = join(path, '/', dim.name());
        dim.set_fqn(fqn);
    }
    for e in group.enumerations_mut() {
        let fqn = join(path, '/', e.name());
        e.set_fqn(fqn);
    }
    for child in group.members_mut() {
        let fqn = join(path, sep, child.name());
        assign_node(child, fqn);
    }
}

fn assign_node(node: &mut Node, fqn: String) {
    node.set_fqn(fqn.clone());
    if let Node::Group(g) = node {
        assign_group(g, &fqn, '/');
        return;
    }
    if let Node::Grid(g) = node {
        let array_fqn = join(&fqn, '.', g.array().name());
        g.array_mut().set_fqn(array_fqn);
        for map in g.maps_mut() {
            let map_fqn = join(&fqn, '.', map.name());
            map.set_fqn(map_fqn);
        }
        return;
    }
    if let Some(children) = node.members_mut() {
        for child in children {
            let child_fqn = join(&fqn, '.', child.name());
            assign_node(child, child_fqn);
        }
    }
}

fn walk_into<'a>(var: &'a dyn Variable, out: &mut Vec<&'a dyn Variable>) {
    out.push(var);
    for child in var.children() {
        walk_into(child, out);
    }
}

fn find_node<'a>(nodes: &'a [Node], fqn: &str) -> Option<&'a Node> {
    for node in nodes {
        if node.fqn() == fqn {
            return Some(node);
        }
        if let Some(found) = find_node(node.members(), fqn) {
            return Some(found);
        }
    }
    None
}

fn find_node_mut<'a>(nodes: &'a mut [Node], fqn: &str) -> Option<&'a mut Node> {
    for node in nodes.iter_mut() {
        if node.fqn() == fqn {
            return Some(node);
        }
        if let Some(children) = node.members_mut() {
            if let Some(found) = find_node_mut(children, fqn) {
                return Some(found);
            }
        }
    }
    None
}

fn find_leaf<'a>(nodes: &'a [Node], fqn: &str) -> Option<&'a Leaf> {
    for node in nodes {
        match node {
            Node::Leaf(leaf) if leaf.fqn() == fqn => return Some(leaf),
            Node::Grid(grid) => {
                let member = std::iter::once(grid.array())
                    .chain(grid.maps().iter())
                    .find(|l| l.fqn() == fqn);
                if member.is_some() {
                    return member;
                }
            }
            other => {
                if let Some(found) = find_leaf(other.members(), fqn) {
                    return Some(found);
                }
            }
        }
    }
    None
}

fn find_leaf_mut<'a>(nodes: &'a mut [Node], fqn: &str) -> Option<&'a mut Leaf> {
    for node in nodes.iter_mut() {
        match node {
            Node::Leaf(leaf) => {
                if leaf.fqn() == fqn {
                    return Some(leaf);
                }
            }
            Node::Grid(grid) => {
                if grid.array().fqn() == fqn {
                    return Some(grid.array_mut());
                }
                if let Some(map) = grid.maps_mut().iter_mut().find(|m| m.fqn() == fqn) {
                    return Some(map);
                }
            }
            other => {
                if let Some(children) = other.members_mut() {
                    if let Some(found) = find_leaf_mut(children, fqn) {
                        return Some(found);
                    }
                }
            }
        }
    }
    None
}

fn find_dimension_mut<'a>(group: &'a mut Group, fqn: &str) -> Option<&'a mut Dimension> {
    if group.dimensions().iter().any(|d| d.fqn() == fqn) {
        return group.dimensions_mut().iter_mut().find(|d| d.fqn() == fqn);
    }
    for child in group.members_mut() {
        if let Node::Group(g) = child {
            if let Some(found) = find_dimension_mut(g, fqn) {
                return Some(found);
            }
        }
    }
    None
}

fn collect_groups<'a>(group: &'a Group, out: &mut Vec<&'a Group>) {
    out.push(group);
    for g in group.members().iter().filter_map(Node::as_group) {
        collect_groups(g, out);
    }
}

fn visit_leaves<F: FnMut(&mut Leaf)>(nodes: &mut [Node], f: &mut F) {
    for node in nodes.iter_mut() {
        match node {
            Node::Leaf(leaf) => f(leaf),
            Node::Grid(grid) => {
                f(grid.array_mut());
                for map in grid.maps_mut() {
                    f(map);
                }
            }
            other => {
                if let Some(children) = other.members_mut() {
                    visit_leaves(children, f);
                }
            }
        }
    }
}

fn bind_nodes(nodes: &mut [Node], source: &RemoteSource) {
    for node in nodes.iter_mut() {
        match node {
            Node::Leaf(leaf) => leaf.bind_remote(source.clone()),
            Node::Grid(grid) => {
                grid.array_mut().bind_remote(source.clone());
                for map in grid.maps_mut() {
                    map.bind_remote(source.clone());
                }
            }
            Node::Sequence(seq) => seq.bind_remote(source.clone()),
            other => {
                if let Some(children) = other.members_mut() {
                    bind_nodes(children, source);
                }
            }
        }
    }
}

fn visit_sequences<F: FnMut(&mut Sequence)>(nodes: &mut [Node], f: &mut F) {
    for node in nodes.iter_mut() {
        if let Some(children) = node.members_mut() {
            visit_sequences(children, f);
        }
        if let Node::Sequence(seq) = node {
            f(seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DataType;
    use crate::node::{Dim, Structure};

    fn dap2_dataset() -> Dataset {
        let mut root = Group::new("example");
        root.add(Leaf::new("SST", DataType::Float32, vec![Dim::named("TIME", 12)]).into())
            .unwrap();
        let mut s = Structure::new("station");
        s.add(Leaf::new("id", DataType::String, vec![]).into()).unwrap();
        root.add(s.into()).unwrap();
        let array = Leaf::new("z", DataType::Int16, vec![Dim::named("x", 2)]);
        let map = Leaf::new("x", DataType::Float64, vec![Dim::named("x", 2)]);
        root.add(Grid::new("g", array, vec![map]).unwrap().into()).unwrap();
        Dataset::new(Protocol::Dap2, root).unwrap()
    }

    #[test]
    fn test_dap2_fqns() {
        let ds = dap2_dataset();
        let fqns: Vec<_> = ds.walk().iter().map(|v| v.fqn().to_string()).collect();
        assert_eq!(fqns, vec!["SST", "station", "station.id", "g", "g.z", "g.x"]);
        assert_eq!(ds.fqn(), "example");
        assert!(ds.leaf("g.x").is_some());
        assert!(ds.leaf("station.id").is_some());
        assert!(ds.node("station").is_some());
        assert!(ds.grid("g").is_some());
    }

    #[test]
    fn test_dap4_fqns_and_dimension_resolution() {
        let mut heights = Group::new("heights");
        heights.add_dimension(Dimension::new("delta_time", 100)).unwrap();
        heights
            .add(Leaf::new("h_ph", DataType::Float32, vec![Dim::named("/gt1r/heights/delta_time", 100)]).into())
            .unwrap();
        let mut gt1r = Group::new("gt1r");
        gt1r.add(heights.into()).unwrap();
        let mut root = Group::new("ATL03");
        root.add(gt1r.into()).unwrap();

        let ds = Dataset::new(Protocol::Dap4, root).unwrap();
        assert!(ds.leaf("/gt1r/heights/h_ph").is_some());
        assert_eq!(ds.dimension("/gt1r/heights/delta_time").map(|d| d.size), Some(100));
        assert!(ds.group("/gt1r/heights").is_some());
        assert!(ds.group("/").is_some());
    }

    #[test]
    fn test_unresolved_dimension_is_model_error() {
        let mut root = Group::new("d");
        root.add(Leaf::new("v", DataType::Int32, vec![Dim::named("/nope", 3)]).into())
            .unwrap();
        let err = Dataset::new(Protocol::Dap4, root).unwrap_err();
        assert!(matches!(err, DapError::Model(_)));
    }

    #[test]
    fn test_dimension_of_sibling_group_is_out_of_scope() {
        let mut a = Group::new("a");
        a.add_dimension(Dimension::new("n", 4)).unwrap();
        let mut b = Group::new("b");
        b.add(Leaf::new("v", DataType::Int32, vec![Dim::named("/a/n", 4)]).into())
            .unwrap();
        let mut root = Group::new("d");
        root.add(a.into()).unwrap();
        root.add(b.into()).unwrap();
        let err = Dataset::new(Protocol::Dap4, root).unwrap_err();
        assert!(matches!(err, DapError::Model(_)));
    }

    #[test]
    fn test_in_scope() {
        assert!(in_scope("/n", "/g/h/v"));
        assert!(in_scope("/g/n", "/g/v"));
        assert!(in_scope("/g/n", "/g/h/s.m"));
        assert!(!in_scope("/g/n", "/gx/v"));
        assert!(!in_scope("/g/h/n", "/g/v"));
    }

    #[test]
    fn test_overflowing_shape_is_model_error() {
        let huge = 1usize << (usize::BITS / 2);
        let mut root = Group::new("d");
        root.add(
            Leaf::new(
                "v",
                DataType::Int32,
                vec![Dim::named("a", huge), Dim::named("b", huge), Dim::named("c", huge)],
            )
            .into(),
        )
        .unwrap();
        let err = Dataset::new(Protocol::Dap2, root).unwrap_err();
        assert!(matches!(err, DapError::Model(_)));
    }

    #[test]
    fn test_dap2_rejects_groups() {
        let mut root = Group::new("d");
        root.add(Group::new("g").into()).unwrap();
        assert!(Dataset::new(Protocol::Dap2, root).is_err());
    }

    #[test]
    fn test_attributes_of_mut_reaches_grid_members() {
        let mut ds = dap2_dataset();
        ds.attributes_of_mut("g.x")
            .unwrap()
            .insert("units", crate::AttributeValue::text("m"));
        assert!(ds.leaf("g.x").unwrap().attributes.contains("units"));
        ds.attributes_of_mut("example")
            .unwrap()
            .insert("title", crate::AttributeValue::text("t"));
        assert!(ds.attributes().contains("title"));
    }

    #[test]
    fn test_for_each_leaf_mut_visits_everything() {
        let mut ds = dap2_dataset();
        let mut count = 0;
        ds.for_each_leaf_mut(|_| count += 1);
        assert_eq!(count, 4);
    }

    #[test]
    fn test_bind_remote_skips_sequence_columns() {
        let mut root = Group::new("d");
        root.add(Leaf::new("x", DataType::Int32, vec![]).into()).unwrap();
        let mut seq = Sequence::new("casts");
        seq.add(Leaf::new("a", DataType::Int32, vec![]).into()).unwrap();
        root.add(seq.into()).unwrap();
        let mut ds = Dataset::new(Protocol::Dap2, root).unwrap();

        let source = RemoteSource {
            base_url: "http://test/d".to_string(),
            protocol: Protocol::Dap2,
        };
        ds.bind_remote(&source);
        assert_eq!(ds.leaf("x").unwrap().remote(), Some(&source));
        assert_eq!(ds.sequence("casts").unwrap().remote(), Some(&source));
        assert!(ds.leaf("casts.a").unwrap().remote().is_none());
    }
}
