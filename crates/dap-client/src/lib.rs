//! DAP2/DAP4 client.
//!
//! Opens datasets from their metadata, binds every variable to its remote
//! source and turns slice requests into constraint expressions, one fetch
//! and one decode. Network access goes through the [`Transport`] trait so
//! authentication or caching layers can be swapped in without touching the
//! protocol code.
//!
//! ```ignore
//! let client = DapClient::new(ClientConfig::from_env())?;
//! let dataset = client.open_url("http://server/data/sst.nc").await?;
//! let sst = client.array(&dataset, "SST")?;
//! let subset = sst.slice(&Selection::parse_list("0,10:14,10:14")?).await?;
//! assert_eq!(subset.shape(), vec![1, 4, 4]);
//! ```

pub mod ce;
pub mod client;
pub mod config;
pub mod consolidate;
pub mod proxy;
pub mod transport;

pub use ce::{
    apply_dimension_subsets, compose_slabs, Dap2Constraint, Dap4Constraint, Filter, FilterOp, FilterValue,
    Hyperslab, Selection,
};
pub use client::{resolve_url, DapClient};
pub use config::{ClientConfig, ConfigError};
pub use consolidate::{dimension_length, Consolidated};
pub use proxy::{ArrayProxy, GridProxy, Records, SequenceProxy};
pub use transport::{HttpTransport, MemoryTransport, Transport};

pub use dap4_parser::ChecksumMode;
pub use dap_model::{DapError, DapResult, Dataset, Protocol};
