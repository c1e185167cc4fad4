//! Parallel metadata consolidation across the granules of a collection.
//!
//! Every metadata request goes through one bounded [`Transport::fetch_many`]
//! call; a failing granule is reported next to the others and never aborts
//! them.

use bytes::Bytes;
use tracing::{info, instrument, warn};

use dap2_parser::parse_dataset;
use dap4_parser::parse_dmr;
use dap_model::{DapError, DapResult, Dataset, NodeKind, Protocol, RemoteSource, Variable};

use crate::client::{resolve_url, DapClient};
use crate::transport::Transport;

/// Metadata of every granule, in input order.
#[derive(Debug)]
pub struct Consolidated {
    pub concat_dim: String,
    pub datasets: Vec<(String, DapResult<Dataset>)>,
    /// Length of `concat_dim` summed over the successful granules.
    pub total_length: usize,
}

impl Consolidated {
    pub fn successes(&self) -> impl Iterator<Item = (&str, &Dataset)> {
        self.datasets
            .iter()
            .filter_map(|(url, r)| r.as_ref().ok().map(|d| (url.as_str(), d)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &DapError)> {
        self.datasets
            .iter()
            .filter_map(|(url, r)| r.as_ref().err().map(|e| (url.as_str(), e)))
    }
}

/// Extent of the dimension `name` in `dataset`.
///
/// DAP4 datasets match a shared dimension by FQN or local name; DAP2
/// datasets match the name of any variable axis.
pub fn dimension_length(dataset: &Dataset, name: &str) -> Option<usize> {
    match dataset.protocol() {
        Protocol::Dap4 => dataset
            .dimensions()
            .into_iter()
            .find(|d| d.fqn() == name || d.name() == name)
            .map(|d| d.size),
        Protocol::Dap2 => dataset
            .walk()
            .into_iter()
            .filter(|v| v.kind() == NodeKind::Leaf)
            .filter_map(|v| dataset.leaf(v.fqn()))
            .flat_map(|leaf| leaf.dims().iter())
            .find(|d| d.name.as_deref() == Some(name))
            .map(|d| d.size),
    }
}

/// Running extent of the concatenation dimension; overflow means a granule
/// lies about its size.
fn add_length(total: usize, length: usize, concat_dim: &str) -> DapResult<usize> {
    total.checked_add(length).ok_or_else(|| {
        DapError::protocol(format!(
            "'{}' length {} overflows the consolidated extent {}",
            concat_dim, length, total
        ))
    })
}

fn text(bytes: &Bytes) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

impl DapClient {
    /// Open the metadata of every URL concurrently and sum the extent of
    /// `concat_dim` over the granules that opened successfully.
    #[instrument(skip(self, urls), fields(granules = urls.len(), concat_dim = %concat_dim))]
    pub async fn consolidate_metadata(&self, urls: &[String], concat_dim: &str) -> Consolidated {
        let resolved: Vec<(String, Protocol)> = urls
            .iter()
            .map(|url| resolve_url(url, self.config().default_protocol))
            .collect();

        let mut requests = Vec::new();
        for (base, protocol) in &resolved {
            match protocol {
                Protocol::Dap2 => {
                    requests.push(format!("{}.dds", base));
                    requests.push(format!("{}.das", base));
                }
                Protocol::Dap4 => requests.push(format!("{}.dmr", base)),
            }
        }
        let mut responses = self.transport().fetch_many(&requests).await.into_iter();

        let mut datasets = Vec::with_capacity(urls.len());
        let mut total_length = 0;
        let mut reference: Option<Vec<String>> = None;

        for (url, (base, protocol)) in urls.iter().zip(&resolved) {
            let parsed = match protocol {
                Protocol::Dap2 => {
                    let dds = responses.next();
                    let das = responses.next();
                    open_dap2_granule(dds, das)
                }
                Protocol::Dap4 => open_dap4_granule(responses.next()),
            };

            let result = parsed.and_then(|mut dataset| {
                let length = dimension_length(&dataset, concat_dim).ok_or_else(|| {
                    DapError::model(format!("dataset has no dimension '{}' to concatenate along", concat_dim))
                })?;
                total_length = add_length(total_length, length, concat_dim)?;
                dataset.bind_remote(&RemoteSource {
                    base_url: base.clone(),
                    protocol: *protocol,
                });
                Ok(dataset)
            });

            match &result {
                Ok(dataset) => {
                    let names: Vec<String> = dataset.walk().iter().map(|v| v.fqn().to_string()).collect();
                    match &reference {
                        Some(first) if *first != names => {
                            warn!(url = %url, "Granule declares different variables than the first granule");
                        }
                        Some(_) => {}
                        None => reference = Some(names),
                    }
                }
                Err(e) => warn!(url = %url, error = %e, "Failed to open granule metadata"),
            }
            datasets.push((url.clone(), result));
        }

        let consolidated = Consolidated {
            concat_dim: concat_dim.to_string(),
            datasets,
            total_length,
        };
        info!(
            succeeded = consolidated.successes().count(),
            failed = consolidated.failures().count(),
            total_length,
            "Consolidated metadata"
        );
        consolidated
    }
}

fn missing() -> DapError {
    DapError::protocol("metadata response missing from batch")
}

fn open_dap2_granule(dds: Option<DapResult<Bytes>>, das: Option<DapResult<Bytes>>) -> DapResult<Dataset> {
    let dds = dds.ok_or_else(missing)??;
    let das = das.ok_or_else(missing)??;
    parse_dataset(&text(&dds), Some(&text(&das)))
}

fn open_dap4_granule(dmr: Option<DapResult<Bytes>>) -> DapResult<Dataset> {
    let dmr = dmr.ok_or_else(missing)??;
    parse_dmr(&text(&dmr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::fixtures;

    #[test]
    fn test_add_length_rejects_overflow() {
        assert_eq!(add_length(10, 5, "time").unwrap(), 15);
        let err = add_length(usize::MAX, 1, "time").unwrap_err();
        assert!(matches!(err, DapError::Protocol(_)));
    }

    #[test]
    fn test_dimension_length_dap2() {
        let ds = dap2_parser::parse_dds(&fixtures::granule_dds(5)).unwrap();
        assert_eq!(dimension_length(&ds, "time"), Some(5));
        assert_eq!(dimension_length(&ds, "lat"), Some(4));
        assert_eq!(dimension_length(&ds, "depth"), None);
    }

    #[test]
    fn test_dimension_length_dap4() {
        let ds = parse_dmr(fixtures::ATL03_DMR).unwrap();
        assert_eq!(dimension_length(&ds, "/gt1r/heights/delta_time"), Some(100));
        assert_eq!(dimension_length(&ds, "delta_time"), Some(100));
    }
}
