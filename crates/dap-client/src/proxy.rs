//! Lazy proxies for remote variables.
//!
//! A proxy remembers where a variable lives and which part of it is
//! currently selected. Narrowing a proxy is free; `fetch`/`slice` build the
//! constraint, issue exactly one request and decode the response into a
//! freshly allocated, materialized node. The node the proxy was created
//! from is never modified.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, instrument};

use dap2_parser::{decode_dods, stream_sequence, RecordStream};
use dap4_parser::{decode_dap, ChecksumMode};
use dap_model::{
    ArrayData, DapError, DapResult, Dataset, Grid, Leaf, NodeKind, Protocol, Record, RemoteSource,
    Sequence, Variable,
};

use crate::ce::{
    compose_slabs, full_slabs, narrowed_dims, Dap2Constraint, Dap4Constraint, Filter, Hyperslab,
    Selection,
};
use crate::transport::Transport;

/// Decode a data response of either protocol.
fn decode_response(protocol: Protocol, bytes: &[u8], checksums: ChecksumMode) -> DapResult<Dataset> {
    match protocol {
        Protocol::Dap2 => decode_dods(bytes),
        Protocol::Dap4 => decode_dap(bytes, checksums),
    }
}

fn remote_source(fqn: &str, source: Option<&RemoteSource>) -> DapResult<RemoteSource> {
    source
        .cloned()
        .ok_or_else(|| DapError::invalid_slice(format!("'{}' is not bound to a remote dataset", fqn)))
}

fn check_extents(leaf: &Leaf) -> DapResult<()> {
    match leaf.dims().iter().position(|d| d.size == 0) {
        Some(axis) => Err(DapError::invalid_slice(format!(
            "'{}' has an empty axis {} and cannot be sliced",
            leaf.fqn(),
            axis
        ))),
        None => Ok(()),
    }
}

/// Take the data of `leaf` out of a decoded response.
///
/// Some servers flatten projected grid members to the top level, so a
/// leaf with the same local name is accepted when the FQN is not found.
fn take_leaf_data(response: &mut Dataset, leaf: &Leaf) -> DapResult<ArrayData> {
    let fqn = if response.leaf(leaf.fqn()).is_some() {
        leaf.fqn().to_string()
    } else {
        let candidates: Vec<String> = response
            .walk()
            .into_iter()
            .filter(|v| v.kind() == NodeKind::Leaf && v.name() == leaf.name())
            .map(|v| v.fqn().to_string())
            .collect();
        match candidates.as_slice() {
            [only] => {
                debug!(expected = %leaf.fqn(), found = %only, "Matched response variable by name");
                only.clone()
            }
            _ => String::new(),
        }
    };

    response
        .leaf_mut(&fqn)
        .and_then(Leaf::take_data)
        .ok_or_else(|| DapError::protocol(format!("response does not contain data for '{}'", leaf.fqn())))
}

// ============================================================================
// Arrays
// ============================================================================

/// A lazily fetched array (or scalar) variable.
#[derive(Clone)]
pub struct ArrayProxy {
    transport: Arc<dyn Transport>,
    leaf: Leaf,
    source: RemoteSource,
    slabs: Vec<Hyperslab>,
    checksums: ChecksumMode,
}

impl ArrayProxy {
    pub fn new(transport: Arc<dyn Transport>, leaf: &Leaf, checksums: ChecksumMode) -> DapResult<Self> {
        let source = remote_source(leaf.fqn(), leaf.remote())?;
        check_extents(leaf)?;
        Ok(Self {
            transport,
            leaf: leaf.clone(),
            source,
            slabs: full_slabs(leaf.dims()),
            checksums,
        })
    }

    /// The variable as declared by the dataset.
    pub fn variable(&self) -> &Leaf {
        &self.leaf
    }

    pub fn slabs(&self) -> &[Hyperslab] {
        &self.slabs
    }

    /// Shape of the current selection.
    pub fn shape(&self) -> Vec<usize> {
        self.slabs.iter().map(Hyperslab::count).collect()
    }

    /// A proxy for a subset of the current selection. No request is made.
    pub fn narrow(&self, selections: &[Selection]) -> DapResult<ArrayProxy> {
        Ok(ArrayProxy {
            slabs: compose_slabs(&self.slabs, selections)?,
            ..self.clone()
        })
    }

    /// The constraint expression for the current selection.
    pub fn constraint(&self) -> String {
        match self.source.protocol {
            Protocol::Dap2 => Dap2Constraint::new().leaf(&self.leaf, &self.slabs).to_string(),
            Protocol::Dap4 => Dap4Constraint::new().leaf(&self.leaf, &self.slabs).to_string(),
        }
    }

    pub fn url(&self) -> String {
        match self.source.protocol {
            Protocol::Dap2 => Dap2Constraint::new()
                .leaf(&self.leaf, &self.slabs)
                .url(&self.source.base_url, "dods"),
            Protocol::Dap4 => Dap4Constraint::new()
                .leaf(&self.leaf, &self.slabs)
                .url(&self.source.base_url, "dap"),
        }
    }

    /// Fetch the current selection as a materialized leaf.
    #[instrument(skip(self), fields(variable = %self.leaf.fqn(), shape = ?self.shape()))]
    pub async fn fetch(&self) -> DapResult<Leaf> {
        let url = self.url();
        debug!(url = %url, "Fetching array slice");
        let bytes = self.transport.fetch(&url, &[]).await?;
        let mut response = decode_response(self.source.protocol, &bytes, self.checksums)?;
        let data = take_leaf_data(&mut response, &self.leaf)?;
        self.leaf.materialize(narrowed_dims(self.leaf.dims(), &self.slabs), data)
    }

    /// Narrow by `selections` and fetch.
    pub async fn slice(&self, selections: &[Selection]) -> DapResult<Leaf> {
        self.narrow(selections)?.fetch().await
    }
}

// ============================================================================
// Grids
// ============================================================================

/// A lazily fetched DAP2 grid.
///
/// With `output_grid` the array and every map are requested together, each
/// map sliced along its own axis; otherwise only the array is fetched and
/// the returned maps are narrowed but unmaterialized.
#[derive(Clone)]
pub struct GridProxy {
    transport: Arc<dyn Transport>,
    grid: Grid,
    source: RemoteSource,
    slabs: Vec<Hyperslab>,
    output_grid: bool,
}

impl GridProxy {
    pub fn new(transport: Arc<dyn Transport>, grid: &Grid, output_grid: bool) -> DapResult<Self> {
        let source = remote_source(grid.fqn(), grid.array().remote())?;
        if source.protocol != Protocol::Dap2 {
            return Err(DapError::protocol("grids only exist in DAP2 datasets"));
        }
        check_extents(grid.array())?;
        Ok(Self {
            transport,
            grid: grid.clone(),
            source,
            slabs: full_slabs(grid.array().dims()),
            output_grid,
        })
    }

    pub fn shape(&self) -> Vec<usize> {
        self.slabs.iter().map(Hyperslab::count).collect()
    }

    pub fn narrow(&self, selections: &[Selection]) -> DapResult<GridProxy> {
        Ok(GridProxy {
            slabs: compose_slabs(&self.slabs, selections)?,
            ..self.clone()
        })
    }

    fn ce(&self) -> Dap2Constraint {
        Dap2Constraint::new().grid(&self.grid, &self.slabs, self.output_grid)
    }

    pub fn constraint(&self) -> String {
        self.ce().to_string()
    }

    pub fn url(&self) -> String {
        self.ce().url(&self.source.base_url, "dods")
    }

    #[instrument(skip(self), fields(grid = %self.grid.fqn(), shape = ?self.shape()))]
    pub async fn fetch(&self) -> DapResult<Grid> {
        let url = self.url();
        debug!(url = %url, output_grid = self.output_grid, "Fetching grid slice");
        let bytes = self.transport.fetch(&url, &[]).await?;
        let mut response = decode_dods(&bytes)?;

        let template = self.grid.array();
        let data = take_leaf_data(&mut response, template)?;
        let array = template.materialize(narrowed_dims(template.dims(), &self.slabs), data)?;

        let mut maps = Vec::with_capacity(self.grid.maps().len());
        for (map, slab) in self.grid.maps().iter().zip(&self.slabs) {
            let dims = narrowed_dims(map.dims(), std::slice::from_ref(slab));
            if self.output_grid {
                let data = take_leaf_data(&mut response, map)?;
                maps.push(map.materialize(dims, data)?);
            } else {
                maps.push(map.with_dims(dims));
            }
        }
        self.grid.with_members(array, maps)
    }

    pub async fn slice(&self, selections: &[Selection]) -> DapResult<Grid> {
        self.narrow(selections)?.fetch().await
    }
}

// ============================================================================
// Sequences
// ============================================================================

enum RecordSource {
    Streamed(RecordStream),
    Buffered(std::vec::IntoIter<Record>),
}

/// The records of one sequence request: a single, non-restartable pass.
///
/// DAP2 top-level sequences are decoded one record per `next()` straight
/// from the response bytes; everything else is decoded up front.
pub struct Records {
    columns: Vec<String>,
    source: RecordSource,
}

impl Records {
    /// Column names of every record, in record order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl Iterator for Records {
    type Item = DapResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            RecordSource::Streamed(stream) => stream.next(),
            RecordSource::Buffered(records) => records.next().map(Ok),
        }
    }
}

impl std::iter::FusedIterator for Records {}

/// A lazily fetched sequence with optional column projection and row
/// filters.
#[derive(Clone)]
pub struct SequenceProxy {
    transport: Arc<dyn Transport>,
    sequence: Sequence,
    source: RemoteSource,
    columns: Vec<String>,
    filters: Vec<Filter>,
    checksums: ChecksumMode,
}

impl SequenceProxy {
    pub fn new(transport: Arc<dyn Transport>, sequence: &Sequence, checksums: ChecksumMode) -> DapResult<Self> {
        let source = remote_source(sequence.fqn(), sequence.remote())?;
        Ok(Self {
            transport,
            sequence: sequence.clone(),
            source,
            columns: Vec::new(),
            filters: Vec::new(),
            checksums,
        })
    }

    /// Keep only the named (escaped) columns.
    pub fn select(&self, columns: &[&str]) -> DapResult<SequenceProxy> {
        self.sequence.project(columns)?;
        Ok(SequenceProxy {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ..self.clone()
        })
    }

    /// Add a row filter; the column must exist.
    pub fn filter(&self, filter: Filter) -> DapResult<SequenceProxy> {
        if self.sequence.get(&filter.column).is_none() {
            return Err(DapError::invalid_slice(format!(
                "sequence '{}' has no column '{}'",
                self.sequence.fqn(),
                filter.column
            )));
        }
        let mut narrowed = self.clone();
        narrowed.filters.push(filter);
        Ok(narrowed)
    }

    pub fn constraint(&self) -> String {
        match self.source.protocol {
            Protocol::Dap2 => self.dap2_ce().to_string(),
            Protocol::Dap4 => self.dap4_ce().to_string(),
        }
    }

    pub fn url(&self) -> String {
        match self.source.protocol {
            Protocol::Dap2 => self.dap2_ce().url(&self.source.base_url, "dods"),
            Protocol::Dap4 => self.dap4_ce().url(&self.source.base_url, "dap"),
        }
    }

    fn dap2_ce(&self) -> Dap2Constraint {
        let fqn = self.sequence.fqn();
        let mut ce = Dap2Constraint::new();
        if self.columns.is_empty() {
            ce = ce.project(fqn);
        } else {
            for column in &self.columns {
                ce = ce.project(format!("{}.{}", fqn, column));
            }
        }
        for filter in &self.filters {
            ce = ce.filter(fqn, filter);
        }
        ce
    }

    /// DAP4 has no column projection inside a sequence term; columns are
    /// projected after decoding.
    fn dap4_ce(&self) -> Dap4Constraint {
        let fqn = self.sequence.fqn();
        self.filters
            .iter()
            .fold(Dap4Constraint::new().project(fqn), |ce, f| ce.filter(fqn, f.clone()))
    }

    /// Issue the request and return its records. Each call makes exactly
    /// one request.
    #[instrument(skip(self), fields(sequence = %self.sequence.fqn()))]
    pub async fn records(&self) -> DapResult<Records> {
        let url = self.url();
        debug!(url = %url, "Fetching sequence");
        let bytes = self.transport.fetch(&url, &[]).await?;
        match self.source.protocol {
            Protocol::Dap2 => self.dap2_records(bytes),
            Protocol::Dap4 => self.dap4_records(&bytes),
        }
    }

    fn dap2_records(&self, bytes: Bytes) -> DapResult<Records> {
        let fqn = self.sequence.fqn();
        if !fqn.contains('.') {
            let stream = stream_sequence(bytes, fqn)?;
            let columns = stream.sequence().columns().iter().map(|c| c.name().to_string()).collect();
            return Ok(Records {
                columns,
                source: RecordSource::Streamed(stream),
            });
        }

        let response = decode_dods(&bytes)?;
        let sequence = response
            .sequence(fqn)
            .ok_or_else(|| DapError::protocol(format!("response does not contain sequence '{}'", fqn)))?;
        Ok(Records {
            columns: sequence.columns().iter().map(|c| c.name().to_string()).collect(),
            source: RecordSource::Buffered(sequence.records().unwrap_or_default().to_vec().into_iter()),
        })
    }

    fn dap4_records(&self, bytes: &[u8]) -> DapResult<Records> {
        let fqn = self.sequence.fqn();
        let response = decode_dap(bytes, self.checksums)?;
        let sequence = response
            .sequence(fqn)
            .ok_or_else(|| DapError::protocol(format!("response does not contain sequence '{}'", fqn)))?;
        let rows = sequence.records().unwrap_or_default();

        if self.columns.is_empty() {
            return Ok(Records {
                columns: sequence.columns().iter().map(|c| c.name().to_string()).collect(),
                source: RecordSource::Buffered(rows.to_vec().into_iter()),
            });
        }

        let indices = self
            .columns
            .iter()
            .map(|c| {
                sequence
                    .column_index(c)
                    .ok_or_else(|| DapError::protocol(format!("response sequence '{}' lacks column '{}'", fqn, c)))
            })
            .collect::<DapResult<Vec<_>>>()?;
        let projected = rows
            .iter()
            .map(|row| Record::new(indices.iter().filter_map(|&i| row.get(i).cloned()).collect()))
            .collect::<Vec<_>>();
        Ok(Records {
            columns: self.columns.clone(),
            source: RecordSource::Buffered(projected.into_iter()),
        })
    }

    /// Fetch every record into a materialized sequence.
    pub async fn fetch(&self) -> DapResult<Sequence> {
        let records = self.records().await?;
        let columns = records.columns().to_vec();
        let rows = records.collect::<DapResult<Vec<_>>>()?;
        let names: Vec<&str> = columns.iter().map(String::as_str).collect();
        let mut sequence = self.sequence.project(&names)?;
        sequence.set_records(rows)?;
        Ok(sequence)
    }
}
