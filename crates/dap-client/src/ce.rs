//! Constraint expressions.
//!
//! Slices are requested with Python-like selections (exclusive stop,
//! negative indices counted from the end) and normalized against the
//! variable's extent into [`Hyperslab`]s, which are what goes on the wire:
//! `[start:step:last]` with an inclusive last index.
//!
//! DAP2 expressions are `proj,proj&filter&filter`; DAP4 expressions are
//! `;`-separated terms carried in the `dap4.ce` query parameter.

use std::fmt;

use dap_model::{
    encode_query_component, DapError, DapResult, Dataset, Dim, Grid, Leaf, Variable,
};

// ============================================================================
// Selections and hyperslabs
// ============================================================================

/// A requested subset of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// A single index; the axis is kept with extent 1.
    Index(i64),
    /// `start:stop:step` with an exclusive stop; missing parts default to
    /// the whole axis and a step of 1.
    Range {
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    },
    All,
}

impl Selection {
    pub fn range(start: i64, stop: i64) -> Self {
        Selection::Range {
            start: Some(start),
            stop: Some(stop),
            step: None,
        }
    }

    pub fn range_step(start: i64, stop: i64, step: i64) -> Self {
        Selection::Range {
            start: Some(start),
            stop: Some(stop),
            step: Some(step),
        }
    }

    /// Resolve against an axis of `extent` elements.
    pub fn normalize(&self, extent: usize) -> DapResult<Hyperslab> {
        if extent == 0 {
            return Err(DapError::invalid_slice("cannot select from an empty axis"));
        }
        let n = extent as i64;
        match *self {
            Selection::All => Ok(Hyperslab::new(0, 1, extent - 1)),
            Selection::Index(i) => {
                let idx = if i < 0 { i + n } else { i };
                if idx < 0 || idx >= n {
                    return Err(DapError::invalid_slice(format!(
                        "index {} is out of range for extent {}",
                        i, extent
                    )));
                }
                Ok(Hyperslab::new(idx as usize, 1, idx as usize))
            }
            Selection::Range { start, stop, step } => {
                let step = step.unwrap_or(1);
                if step <= 0 {
                    return Err(DapError::invalid_slice(format!("step must be positive, got {}", step)));
                }
                let clamp = |v: i64| {
                    let v = if v < 0 { v + n } else { v };
                    v.clamp(0, n)
                };
                let start = start.map(clamp).unwrap_or(0);
                let stop = stop.map(clamp).unwrap_or(n);
                if start >= stop {
                    return Err(DapError::invalid_slice(format!(
                        "selection {}:{} is empty for extent {}",
                        start, stop, extent
                    )));
                }
                let last = start + ((stop - 1 - start) / step) * step;
                Ok(Hyperslab::new(start as usize, step as usize, last as usize))
            }
        }
    }

    /// Parse a comma-separated list of selections: `0,10:14,:,::2,-1`.
    pub fn parse_list(text: &str) -> DapResult<Vec<Selection>> {
        text.split(',').map(|part| Selection::parse(part.trim())).collect()
    }

    pub fn parse(text: &str) -> DapResult<Selection> {
        let bad = || DapError::invalid_slice(format!("invalid selection '{}'", text));
        if text.is_empty() || text == ":" || text == "::" {
            return Ok(Selection::All);
        }
        let parts: Vec<&str> = text.split(':').collect();
        let num = |s: &str| -> DapResult<Option<i64>> {
            let s = s.trim();
            if s.is_empty() {
                Ok(None)
            } else {
                s.parse().map(Some).map_err(|_| bad())
            }
        };
        match parts.as_slice() {
            [i] => num(i)?.map(Selection::Index).ok_or_else(bad),
            [start, stop] => Ok(Selection::Range {
                start: num(start)?,
                stop: num(stop)?,
                step: None,
            }),
            [start, stop, step] => Ok(Selection::Range {
                start: num(start)?,
                stop: num(stop)?,
                step: num(step)?,
            }),
            _ => Err(bad()),
        }
    }
}

/// An index range as sent to the server: `start` to `last` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hyperslab {
    pub start: usize,
    pub step: usize,
    pub last: usize,
}

impl Hyperslab {
    pub fn new(start: usize, step: usize, last: usize) -> Self {
        Self { start, step, last }
    }

    /// The whole of an axis of `extent` elements.
    pub fn full(extent: usize) -> Self {
        Self::new(0, 1, extent.saturating_sub(1))
    }

    /// Number of selected elements.
    pub fn count(&self) -> usize {
        (self.last - self.start) / self.step + 1
    }

    /// Apply `selection` to the elements this slab already selects.
    pub fn compose(&self, selection: &Selection) -> DapResult<Hyperslab> {
        let inner = selection.normalize(self.count())?;
        Ok(Hyperslab::new(
            self.start + inner.start * self.step,
            inner.step * self.step,
            self.start + inner.last * self.step,
        ))
    }
}

impl fmt::Display for Hyperslab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}:{}]", self.start, self.step, self.last)
    }
}

/// Narrow `current` (one slab per axis) by `selections`.
///
/// Missing trailing selections keep the whole axis.
pub fn compose_slabs(current: &[Hyperslab], selections: &[Selection]) -> DapResult<Vec<Hyperslab>> {
    if selections.len() > current.len() {
        return Err(DapError::invalid_slice(format!(
            "{} selections given for a variable of rank {}",
            selections.len(),
            current.len()
        )));
    }
    current
        .iter()
        .enumerate()
        .map(|(axis, slab)| slab.compose(selections.get(axis).unwrap_or(&Selection::All)))
        .collect()
}

/// Full-extent slabs for a list of dimensions.
pub fn full_slabs(dims: &[Dim]) -> Vec<Hyperslab> {
    dims.iter().map(|d| Hyperslab::full(d.size)).collect()
}

/// `dims` with each extent replaced by its slab's element count.
pub fn narrowed_dims(dims: &[Dim], slabs: &[Hyperslab]) -> Vec<Dim> {
    dims.iter()
        .zip(slabs)
        .map(|(dim, slab)| Dim {
            name: dim.name.clone(),
            size: slab.count(),
        })
        .collect()
}

fn render_slabs(slabs: &[Hyperslab]) -> String {
    slabs.iter().map(Hyperslab::to_string).collect()
}

// ============================================================================
// Row filters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Regular expression match.
    Match,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Match => "=~",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "=" | "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "=~" => Some(Self::Match),
            _ => None,
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side of a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Number(f64),
    Text(String),
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        FilterValue::Number(v)
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        FilterValue::Number(v as f64)
    }
}

impl From<i32> for FilterValue {
    fn from(v: i32) -> Self {
        FilterValue::Number(v as f64)
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::Text(v.to_string())
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Number(v) => write!(f, "{}", v),
            FilterValue::Text(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        }
    }
}

/// A comparison on one column of a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Escaped column name, relative to the sequence.
    pub column: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<FilterValue>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Parse `column<op>value`; quoted values are text, others numbers.
    pub fn parse(text: &str) -> DapResult<Filter> {
        const OPS: [&str; 7] = ["!=", "<=", ">=", "=~", "=", "<", ">"];
        let bad = || DapError::invalid_slice(format!("invalid filter '{}'", text));

        let (pos, op) = OPS
            .iter()
            .filter_map(|op| text.find(op).map(|pos| (pos, *op)))
            .min_by_key(|(pos, op)| (*pos, std::cmp::Reverse(op.len())))
            .ok_or_else(bad)?;
        let column = text[..pos].trim();
        let raw = text[pos + op.len()..].trim();
        if column.is_empty() || raw.is_empty() {
            return Err(bad());
        }
        let op = FilterOp::from_str(op).ok_or_else(bad)?;
        let value = if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
            FilterValue::Text(raw[1..raw.len() - 1].replace("\\\"", "\"").replace("\\\\", "\\"))
        } else {
            FilterValue::Number(raw.parse().map_err(|_| bad())?)
        };
        Ok(Filter::new(column, op, value))
    }

    fn render(&self) -> String {
        format!("{}{}{}", self.column, self.op, self.value)
    }
}

// ============================================================================
// DAP2
// ============================================================================

/// A legacy constraint: projections joined by `,`, then `&`-prefixed
/// selection clauses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dap2Constraint {
    projections: Vec<String>,
    filters: Vec<String>,
}

impl Dap2Constraint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a whole variable.
    pub fn project(mut self, path: impl Into<String>) -> Self {
        self.projections.push(path.into());
        self
    }

    /// Request a variable with one slab per axis.
    pub fn project_slabs(mut self, path: &str, slabs: &[Hyperslab]) -> Self {
        self.projections.push(format!("{}{}", path, render_slabs(slabs)));
        self
    }

    /// Request a leaf narrowed to `slabs`.
    pub fn leaf(self, leaf: &Leaf, slabs: &[Hyperslab]) -> Self {
        self.project_slabs(leaf.fqn(), slabs)
    }

    /// Request a grid's array and, when `output_grid` is set, every map
    /// sliced along its own axis.
    pub fn grid(mut self, grid: &Grid, slabs: &[Hyperslab], output_grid: bool) -> Self {
        self = self.leaf(grid.array(), slabs);
        if output_grid {
            for (map, slab) in grid.maps().iter().zip(slabs) {
                self = self.project_slabs(map.fqn(), std::slice::from_ref(slab));
            }
        }
        self
    }

    /// Add a row filter on a column of the sequence `sequence_fqn`.
    pub fn filter(mut self, sequence_fqn: &str, filter: &Filter) -> Self {
        self.filters.push(format!("{}.{}", sequence_fqn, filter.render()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.projections.is_empty() && self.filters.is_empty()
    }

    pub fn projections(&self) -> &[String] {
        &self.projections
    }

    /// The expression percent-encoded for the query part of a URL.
    pub fn to_query(&self) -> String {
        let mut query = self
            .projections
            .iter()
            .map(|p| encode_query_component(p))
            .collect::<Vec<_>>()
            .join(",");
        for filter in &self.filters {
            query.push('&');
            query.push_str(&encode_query_component(filter));
        }
        query
    }

    /// `base.suffix?query`, or `base.suffix` for an empty constraint.
    pub fn url(&self, base_url: &str, suffix: &str) -> String {
        if self.is_empty() {
            format!("{}.{}", base_url, suffix)
        } else {
            format!("{}.{}?{}", base_url, suffix, self.to_query())
        }
    }
}

impl fmt::Display for Dap2Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.projections.join(","))?;
        for filter in &self.filters {
            write!(f, "&{}", filter)?;
        }
        Ok(())
    }
}

// ============================================================================
// DAP4
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Dap4Term {
    path: String,
    slabs: Vec<Hyperslab>,
    filters: Vec<Filter>,
}

/// A DAP4 constraint: shared-dimension assignments followed by variable
/// terms, all joined by `;`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dap4Constraint {
    dimensions: Vec<(String, Hyperslab)>,
    terms: Vec<Dap4Term>,
}

impl Dap4Constraint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subset the shared dimension `fqn`; every variable using it follows.
    pub fn dimension(mut self, fqn: impl Into<String>, slab: Hyperslab) -> Self {
        self.dimensions.push((fqn.into(), slab));
        self
    }

    /// Request a whole variable (or subtree).
    pub fn project(self, path: impl Into<String>) -> Self {
        self.project_slabs(path, &[])
    }

    /// Request a variable with one slab per axis.
    pub fn project_slabs(mut self, path: impl Into<String>, slabs: &[Hyperslab]) -> Self {
        self.terms.push(Dap4Term {
            path: path.into(),
            slabs: slabs.to_vec(),
            filters: Vec::new(),
        });
        self
    }

    pub fn leaf(self, leaf: &Leaf, slabs: &[Hyperslab]) -> Self {
        self.project_slabs(leaf.fqn(), slabs)
    }

    /// Add a row filter to the sequence `sequence_fqn`, projecting it if
    /// it is not already part of the constraint.
    pub fn filter(mut self, sequence_fqn: &str, filter: Filter) -> Self {
        match self.terms.iter_mut().find(|t| t.path == sequence_fqn) {
            Some(term) => term.filters.push(filter),
            None => self.terms.push(Dap4Term {
                path: sequence_fqn.to_string(),
                slabs: Vec::new(),
                filters: vec![filter],
            }),
        }
        self
    }

    pub fn dimensions(&self) -> &[(String, Hyperslab)] {
        &self.dimensions
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty() && self.terms.is_empty()
    }

    /// Parse an expression such as `/g/dim=[0:1:9];/g/v[0:2:8];/seq|a>1`.
    pub fn parse(text: &str) -> DapResult<Dap4Constraint> {
        let mut ce = Dap4Constraint::new();
        for term in text.split(';').map(str::trim).filter(|t| !t.is_empty()) {
            let head_end = term.find(['[', '|']).unwrap_or(term.len());
            if let Some(eq) = term[..head_end].find('=') {
                let slabs = parse_slabs(&term[eq + 1..])?;
                let [slab] = slabs.as_slice() else {
                    return Err(DapError::invalid_slice(format!(
                        "dimension assignment '{}' needs exactly one range",
                        term
                    )));
                };
                ce = ce.dimension(term[..eq].trim(), *slab);
                continue;
            }

            let (head, filters) = match term.split_once('|') {
                Some((head, filters)) => (head, Some(filters)),
                None => (term, None),
            };
            let bracket = head.find('[').unwrap_or(head.len());
            let path = head[..bracket].trim();
            if path.is_empty() {
                return Err(DapError::invalid_slice(format!("term '{}' names no variable", term)));
            }
            ce = ce.project_slabs(path, &parse_slabs(&head[bracket..])?);
            if let Some(filters) = filters {
                for filter in filters.split(',').map(str::trim).filter(|f| !f.is_empty()) {
                    ce = ce.filter(path, Filter::parse(filter)?);
                }
            }
        }
        Ok(ce)
    }

    /// `dap4.ce=<encoded expression>`
    pub fn to_query(&self) -> String {
        format!("dap4.ce={}", encode_query_component(&self.to_string()))
    }

    /// `base.suffix?dap4.ce=...`, or `base.suffix` for an empty constraint.
    pub fn url(&self, base_url: &str, suffix: &str) -> String {
        if self.is_empty() {
            format!("{}.{}", base_url, suffix)
        } else {
            format!("{}.{}?{}", base_url, suffix, self.to_query())
        }
    }
}

impl fmt::Display for Dap4Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .dimensions
            .iter()
            .map(|(name, slab)| format!("{}={}", name, slab))
            .collect();
        for term in &self.terms {
            let mut part = format!("{}{}", term.path, render_slabs(&term.slabs));
            if !term.filters.is_empty() {
                part.push('|');
                part.push_str(&term.filters.iter().map(Filter::render).collect::<Vec<_>>().join(","));
            }
            parts.push(part);
        }
        f.write_str(&parts.join(";"))
    }
}

/// Parse `[a]`, `[a:b]` or `[a:s:b]` groups (inclusive last index).
fn parse_slabs(text: &str) -> DapResult<Vec<Hyperslab>> {
    let bad = || DapError::invalid_slice(format!("invalid index range '{}'", text));
    let mut slabs = Vec::new();
    let mut rest = text.trim();
    while !rest.is_empty() {
        let body_end = rest.find(']').ok_or_else(bad)?;
        let body = rest.strip_prefix('[').ok_or_else(bad)?;
        let body = &body[..body_end - 1];
        let nums = body
            .split(':')
            .map(|n| n.trim().parse::<usize>().map_err(|_| bad()))
            .collect::<DapResult<Vec<_>>>()?;
        let slab = match nums.as_slice() {
            [i] => Hyperslab::new(*i, 1, *i),
            [start, last] => Hyperslab::new(*start, 1, *last),
            [start, step, last] if *step > 0 => Hyperslab::new(*start, *step, *last),
            _ => return Err(bad()),
        };
        if slab.last < slab.start {
            return Err(bad());
        }
        slabs.push(slab);
        rest = rest[body_end + 1..].trim_start();
    }
    Ok(slabs)
}

/// A copy of `dataset` with every shared dimension assignment of `ce`
/// applied: the dimension's size and every variable using it are narrowed.
///
/// Narrowed variables come back unmaterialized; the rest are untouched.
pub fn apply_dimension_subsets(dataset: &Dataset, ce: &Dap4Constraint) -> DapResult<Dataset> {
    let mut subset = dataset.clone();
    for (fqn, slab) in ce.dimensions() {
        let dim = subset
            .dimension_mut(fqn)
            .ok_or_else(|| DapError::invalid_slice(format!("dataset has no dimension '{}'", fqn)))?;
        if slab.last >= dim.size {
            return Err(DapError::invalid_slice(format!(
                "range {} exceeds dimension '{}' of size {}",
                slab, fqn, dim.size
            )));
        }
        dim.size = slab.count();
    }

    subset.for_each_leaf_mut(|leaf| {
        let uses_subset = leaf.dims().iter().any(|d| {
            d.name
                .as_deref()
                .is_some_and(|name| ce.dimensions().iter().any(|(fqn, _)| fqn == name))
        });
        if !uses_subset {
            return;
        }
        let dims = leaf
            .dims()
            .iter()
            .map(|d| {
                let assigned = d
                    .name
                    .as_deref()
                    .and_then(|name| ce.dimensions().iter().find(|(fqn, _)| fqn == name));
                match assigned {
                    Some((_, slab)) => Dim {
                        name: d.name.clone(),
                        size: slab.count(),
                    },
                    None => d.clone(),
                }
            })
            .collect();
        *leaf = leaf.with_dims(dims);
    });
    Ok(subset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dap_model::{DataType, Group, Protocol};

    fn slab(start: usize, step: usize, last: usize) -> Hyperslab {
        Hyperslab::new(start, step, last)
    }

    #[test]
    fn test_normalize_defaults_and_negatives() {
        assert_eq!(Selection::All.normalize(5).unwrap(), slab(0, 1, 4));
        assert_eq!(Selection::Index(-1).normalize(5).unwrap(), slab(4, 1, 4));
        assert_eq!(Selection::range(10, 14).normalize(180).unwrap(), slab(10, 1, 13));
        assert_eq!(Selection::range_step(1, 10, 3).normalize(20).unwrap(), slab(1, 3, 7));
        assert_eq!(
            Selection::Range {
                start: Some(-3),
                stop: None,
                step: None
            }
            .normalize(10)
            .unwrap(),
            slab(7, 1, 9)
        );
        // Stop past the end is clamped
        assert_eq!(Selection::range(2, 100).normalize(5).unwrap(), slab(2, 1, 4));
    }

    #[test]
    fn test_invalid_selections() {
        assert!(matches!(Selection::Index(5).normalize(5), Err(DapError::InvalidSlice(_))));
        assert!(matches!(Selection::range(3, 3).normalize(5), Err(DapError::InvalidSlice(_))));
        assert!(matches!(Selection::range_step(0, 3, 0).normalize(5), Err(DapError::InvalidSlice(_))));
        assert!(Selection::All.normalize(0).is_err());
    }

    #[test]
    fn test_count_matches_selected_elements() {
        for extent in 1..12usize {
            for start in 0..extent as i64 {
                for stop in start + 1..=extent as i64 {
                    for step in 1..4 {
                        let s = Selection::range_step(start, stop, step).normalize(extent).unwrap();
                        let expected = (start..stop).step_by(step as usize).count();
                        assert_eq!(s.count(), expected);
                    }
                }
            }
        }
    }

    #[test]
    fn test_compose_maps_through_existing_slab() {
        // Every other element of 0..20, then elements 1..4 of that
        let outer = slab(0, 2, 18);
        let inner = outer.compose(&Selection::range(1, 4)).unwrap();
        assert_eq!(inner, slab(2, 2, 6));
        assert_eq!(inner.count(), 3);
        assert_eq!(outer.compose(&Selection::Index(-1)).unwrap(), slab(18, 1, 18));
    }

    #[test]
    fn test_compose_slabs_rank_checks() {
        let current = full_slabs(&[Dim::anonymous(4), Dim::anonymous(5)]);
        let narrowed = compose_slabs(&current, &[Selection::Index(0)]).unwrap();
        assert_eq!(narrowed, vec![slab(0, 1, 0), slab(0, 1, 4)]);
        assert!(compose_slabs(&current, &[Selection::All; 3]).is_err());
    }

    #[test]
    fn test_parse_selection_list() {
        let sels = Selection::parse_list("0, 10:14, :, ::2, -1").unwrap();
        assert_eq!(sels[0], Selection::Index(0));
        assert_eq!(sels[1], Selection::range(10, 14));
        assert_eq!(sels[2], Selection::All);
        assert_eq!(
            sels[3],
            Selection::Range {
                start: None,
                stop: None,
                step: Some(2)
            }
        );
        assert_eq!(sels[4], Selection::Index(-1));
        assert!(Selection::parse("a:b").is_err());
    }

    #[test]
    fn test_dap2_sst_subset() {
        let leaf = Leaf::new(
            "SST",
            DataType::Float32,
            vec![Dim::named("TIME", 12), Dim::named("Y", 90), Dim::named("X", 180)],
        );
        let sels = [Selection::Index(0), Selection::range(10, 14), Selection::range(10, 14)];
        let slabs = compose_slabs(&full_slabs(leaf.dims()), &sels).unwrap();
        let ce = Dap2Constraint::new().project_slabs("SST", &slabs);
        assert_eq!(ce.to_string(), "SST[0:1:0][10:1:13][10:1:13]");
        assert_eq!(ce.to_query(), "SST%5B0:1:0%5D%5B10:1:13%5D%5B10:1:13%5D");
        assert_eq!(
            narrowed_dims(leaf.dims(), &slabs).iter().map(|d| d.size).collect::<Vec<_>>(),
            vec![1, 4, 4]
        );
    }

    #[test]
    fn test_dap2_output_grid_terms() {
        let mut root = Group::new("coads");
        let array = Leaf::new("sst", DataType::Int16, vec![Dim::named("time", 2), Dim::named("lat", 3)]);
        let maps = vec![
            Leaf::new("time", DataType::Float64, vec![Dim::named("time", 2)]),
            Leaf::new("lat", DataType::Float64, vec![Dim::named("lat", 3)]),
        ];
        root.add(Grid::new("sst", array, maps).unwrap().into()).unwrap();
        let ds = Dataset::new(Protocol::Dap2, root).unwrap();
        let grid = ds.grid("sst").unwrap();

        let slabs = [slab(1, 1, 1), slab(0, 2, 2)];
        let with_maps = Dap2Constraint::new().grid(grid, &slabs, true);
        assert_eq!(
            with_maps.to_string(),
            "sst.sst[1:1:1][0:2:2],sst.time[1:1:1],sst.lat[0:2:2]"
        );
        let array_only = Dap2Constraint::new().grid(grid, &slabs, false);
        assert_eq!(array_only.to_string(), "sst.sst[1:1:1][0:2:2]");
    }

    #[test]
    fn test_dap2_filters() {
        let ce = Dap2Constraint::new()
            .project("casts.a")
            .filter("casts", &Filter::new("a", FilterOp::Gt, 1))
            .filter("casts", &Filter::new("name", FilterOp::Match, "^st"));
        assert_eq!(ce.to_string(), "casts.a&casts.a>1&casts.name=~\"^st\"");
        assert_eq!(ce.url("http://h/d", "dods"), "http://h/d.dods?casts.a&casts.a%3E1&casts.name%3D~%22%5Est%22");
        assert_eq!(Dap2Constraint::new().url("http://h/d", "dods"), "http://h/d.dods");
    }

    #[test]
    fn test_filter_parse() {
        let f = Filter::parse("temp>=20.5").unwrap();
        assert_eq!(f.op, FilterOp::Ge);
        assert_eq!(f.value, FilterValue::Number(20.5));
        let f = Filter::parse("name=~\"ab\"").unwrap();
        assert_eq!(f.op, FilterOp::Match);
        assert_eq!(f.value, FilterValue::Text("ab".into()));
        assert_eq!(Filter::parse("a!=3").unwrap().op, FilterOp::Ne);
        assert!(Filter::parse("a>").is_err());
        assert!(Filter::parse("abc").is_err());
    }

    #[test]
    fn test_dap4_expression() {
        let ce = Dap4Constraint::new()
            .dimension("/gt1r/heights/delta_time", slab(0, 1, 9))
            .project("/gt1r/heights/h_ph")
            .project_slabs("/x", &[slab(0, 2, 8)])
            .filter("/obs", Filter::new("id", FilterOp::Lt, 5));
        assert_eq!(
            ce.to_string(),
            "/gt1r/heights/delta_time=[0:1:9];/gt1r/heights/h_ph;/x[0:2:8];/obs|id<5"
        );
        assert!(ce.to_query().starts_with("dap4.ce=/gt1r/heights/delta_time%3D%5B0:1:9%5D%3B"));
    }

    #[test]
    fn test_dap4_parse_roundtrip() {
        let text = "/gt1r/heights/delta_time=[0:1:9];/x[0:2:8][3:1:3];/obs|id<5,tag=\"a\"";
        let ce = Dap4Constraint::parse(text).unwrap();
        assert_eq!(ce.dimensions(), &[("/gt1r/heights/delta_time".to_string(), slab(0, 1, 9))]);
        assert_eq!(ce.to_string(), text);
        assert!(Dap4Constraint::parse("/d=[0:1:2][0:1:2]").is_err());
        assert!(Dap4Constraint::parse("/x[5:1:2]").is_err());
    }
}
