//! Opening remote and local datasets.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use dap2_parser::{decode_dods, parse_dataset, parse_dds};
use dap4_parser::{decode_dap, parse_dmr};
use dap_model::{DapError, DapResult, Dataset, Protocol, RemoteSource};

use crate::ce::{Dap2Constraint, Dap4Constraint};
use crate::config::ClientConfig;
use crate::proxy::{ArrayProxy, GridProxy, SequenceProxy};
use crate::transport::{HttpTransport, Transport};

const DAP2_SUFFIXES: [&str; 5] = [".dds", ".das", ".dods", ".html", ".info"];
const DAP4_SUFFIXES: [&str; 4] = [".dmr.xml", ".dmr", ".dap", ".dsr"];

/// Split a dataset URL into its base URL (no response suffix, no query)
/// and the protocol to speak.
///
/// `dap2://` and `dap4://` schemes select the protocol and are rewritten to
/// `https://`; otherwise a response suffix decides, then `default`.
pub fn resolve_url(url: &str, default: Protocol) -> (String, Protocol) {
    let (mut url, mut protocol) = if let Some(rest) = url.strip_prefix("dap4://") {
        (format!("https://{}", rest), Some(Protocol::Dap4))
    } else if let Some(rest) = url.strip_prefix("dap2://") {
        (format!("https://{}", rest), Some(Protocol::Dap2))
    } else {
        (url.to_string(), None)
    };

    if let Some((base, query)) = url.split_once('?') {
        warn!(query = %query, "Ignoring query string in dataset URL");
        url = base.to_string();
    }

    let suffixes = DAP4_SUFFIXES
        .iter()
        .map(|s| (*s, Protocol::Dap4))
        .chain(DAP2_SUFFIXES.iter().map(|s| (*s, Protocol::Dap2)));
    for (suffix, suffix_protocol) in suffixes {
        if let Some(base) = url.strip_suffix(suffix) {
            url = base.to_string();
            protocol = protocol.or(Some(suffix_protocol));
            break;
        }
    }

    (url, protocol.unwrap_or(default))
}

fn text(bytes: &Bytes) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Entry point for opening datasets and creating proxies.
#[derive(Clone)]
pub struct DapClient {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
}

impl DapClient {
    /// A client speaking HTTP with the given configuration.
    pub fn new(config: ClientConfig) -> DapResult<Self> {
        config
            .validate()
            .map_err(|e| DapError::transport("", None, format!("invalid client configuration: {}", e)))?;
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// A client over any transport (authenticated, caching, in-memory...).
    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    // ------------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------------

    /// Open a dataset lazily: metadata only, every variable bound to the
    /// remote source.
    pub async fn open_url(&self, url: &str) -> DapResult<Dataset> {
        let (base, protocol) = resolve_url(url, self.config.default_protocol);
        match protocol {
            Protocol::Dap2 => self.open_dap2(&base).await,
            Protocol::Dap4 => self.open_dap4(&base).await,
        }
    }

    /// Fetch `.dds` and `.das` concurrently and merge them.
    #[instrument(skip(self), fields(url = %base_url))]
    pub async fn open_dap2(&self, base_url: &str) -> DapResult<Dataset> {
        let dds_url = format!("{}.dds", base_url);
        let das_url = format!("{}.das", base_url);
        let (dds, das) = tokio::try_join!(self.transport.fetch(&dds_url, &[]), self.transport.fetch(&das_url, &[]))?;

        let mut dataset = parse_dataset(&text(&dds), Some(&text(&das)))?;
        dataset.bind_remote(&RemoteSource {
            base_url: base_url.to_string(),
            protocol: Protocol::Dap2,
        });
        info!(dataset = %dataset.name(), variables = dataset.walk().len(), "Opened DAP2 dataset");
        Ok(dataset)
    }

    /// Fetch and parse the `.dmr`.
    #[instrument(skip(self), fields(url = %base_url))]
    pub async fn open_dap4(&self, base_url: &str) -> DapResult<Dataset> {
        let dmr = self.transport.fetch(&format!("{}.dmr", base_url), &[]).await?;

        let mut dataset = parse_dmr(&text(&dmr))?;
        dataset.bind_remote(&RemoteSource {
            base_url: base_url.to_string(),
            protocol: Protocol::Dap4,
        });
        info!(dataset = %dataset.name(), variables = dataset.walk().len(), "Opened DAP4 dataset");
        Ok(dataset)
    }

    // ------------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------------

    /// Fetch a whole `.dods` response and return it materialized.
    pub async fn open_dods(&self, url: &str) -> DapResult<Dataset> {
        let (base, _) = resolve_url(url, Protocol::Dap2);
        self.fetch_dods(&base, &Dap2Constraint::new()).await
    }

    /// Fetch a constrained `.dods` response.
    #[instrument(skip(self, ce), fields(url = %base_url, ce = %ce))]
    pub async fn fetch_dods(&self, base_url: &str, ce: &Dap2Constraint) -> DapResult<Dataset> {
        let bytes = self.transport.fetch(&ce.url(base_url, "dods"), &[]).await?;
        decode_dods(&bytes)
    }

    /// Fetch a constrained `.dap` response.
    #[instrument(skip(self, ce), fields(url = %base_url, ce = %ce))]
    pub async fn fetch_dap(&self, base_url: &str, ce: &Dap4Constraint) -> DapResult<Dataset> {
        let bytes = self.transport.fetch(&ce.url(base_url, "dap"), &[]).await?;
        decode_dap(&bytes, self.config.verify_checksums)
    }

    pub fn decode_dods_bytes(&self, bytes: &[u8]) -> DapResult<Dataset> {
        decode_dods(bytes)
    }

    pub fn decode_dap_bytes(&self, bytes: &[u8]) -> DapResult<Dataset> {
        decode_dap(bytes, self.config.verify_checksums)
    }

    /// Read a saved response or metadata document from disk; the format is
    /// chosen by extension (`.dods`, `.dap`, `.dds`, `.dmr`/`.xml`).
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn open_file(&self, path: impl AsRef<Path>) -> DapResult<Dataset> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DapError::transport(display.as_str(), None, e.to_string()))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        debug!(extension = %extension, size = bytes.len(), "Read local file");

        match extension.as_str() {
            "dods" => self.decode_dods_bytes(&bytes),
            "dap" => self.decode_dap_bytes(&bytes),
            "dds" => parse_dds(&String::from_utf8_lossy(&bytes)),
            "dmr" | "xml" => parse_dmr(&String::from_utf8_lossy(&bytes)),
            other => Err(DapError::protocol(format!(
                "cannot tell the format of '{}' from its extension '{}'",
                display, other
            ))),
        }
    }

    // ------------------------------------------------------------------------
    // Proxies
    // ------------------------------------------------------------------------

    pub fn array(&self, dataset: &Dataset, fqn: &str) -> DapResult<ArrayProxy> {
        let leaf = dataset
            .leaf(fqn)
            .ok_or_else(|| DapError::invalid_slice(format!("dataset has no array variable '{}'", fqn)))?;
        ArrayProxy::new(self.transport.clone(), leaf, self.config.verify_checksums)
    }

    pub fn grid(&self, dataset: &Dataset, fqn: &str) -> DapResult<GridProxy> {
        let grid = dataset
            .grid(fqn)
            .ok_or_else(|| DapError::invalid_slice(format!("dataset has no grid '{}'", fqn)))?;
        GridProxy::new(self.transport.clone(), grid, self.config.output_grid)
    }

    pub fn sequence(&self, dataset: &Dataset, fqn: &str) -> DapResult<SequenceProxy> {
        let sequence = dataset
            .sequence(fqn)
            .ok_or_else(|| DapError::invalid_slice(format!("dataset has no sequence '{}'", fqn)))?;
        SequenceProxy::new(self.transport.clone(), sequence, self.config.verify_checksums)
    }
}
