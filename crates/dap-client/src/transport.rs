//! The fetch seam between the protocol engine and the network.
//!
//! Everything the client needs from HTTP is "GET this URL, give me the
//! bytes". Authentication, caching and retries belong to implementations
//! of [`Transport`], never to the decoding code.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use tracing::{debug, instrument, warn};

use dap_model::{DapError, DapResult};

use crate::config::ClientConfig;

/// Maximum number of characters of an error body kept in a transport error.
const ERROR_BODY_LIMIT: usize = 2048;

#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` with extra request headers.
    async fn fetch(&self, url: &str, headers: &[(String, String)]) -> DapResult<Bytes>;

    /// Upper bound on concurrent requests issued by [`Transport::fetch_many`].
    fn max_concurrency(&self) -> usize {
        4
    }

    /// Fetch every URL, at most `max_concurrency` at a time.
    ///
    /// Results are returned in input order; one failure does not affect
    /// the other requests.
    async fn fetch_many(&self, urls: &[String]) -> Vec<DapResult<Bytes>> {
        let limit = self.max_concurrency().max(1);
        let requests: Vec<_> = urls.iter().map(|url| self.fetch(url, &[])).collect();
        stream::iter(requests)
            .buffered(limit)
            .collect()
            .await
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// [`Transport`] over HTTP(S) with `reqwest`.
pub struct HttpTransport {
    client: Client,
    max_concurrency: usize,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> DapResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(config.max_concurrency.max(1))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| DapError::transport("", None, format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_concurrency: config.max_concurrency,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, headers), fields(url = %url))]
    async fn fetch(&self, url: &str, headers: &[(String, String)]) -> DapResult<Bytes> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| DapError::transport(url, e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = truncate(body.trim(), ERROR_BODY_LIMIT);
            warn!(status = status.as_u16(), "Request failed");
            return Err(DapError::transport(
                url,
                Some(status.as_u16()),
                if message.is_empty() {
                    status.to_string()
                } else {
                    message
                },
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DapError::transport(url, Some(status.as_u16()), e.to_string()))?;

        debug!(size = bytes.len(), "Fetched response");
        Ok(bytes)
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// [`Transport`] serving canned responses, recording every URL requested.
///
/// Used for local files and tests. Unknown URLs fail with status 404.
#[derive(Default)]
pub struct MemoryTransport {
    responses: HashMap<String, Result<Bytes, (u16, String)>>,
    fetched: Mutex<Vec<String>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for `url`.
    pub fn insert(&mut self, url: impl Into<String>, body: impl Into<Bytes>) -> &mut Self {
        self.responses.insert(url.into(), Ok(body.into()));
        self
    }

    /// Answer `url` with an HTTP error status and body.
    pub fn insert_error(&mut self, url: impl Into<String>, status: u16, body: impl Into<String>) -> &mut Self {
        self.responses.insert(url.into(), Err((status, body.into())));
        self
    }

    /// Every URL fetched so far, in request order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetched.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn fetch(&self, url: &str, _headers: &[(String, String)]) -> DapResult<Bytes> {
        self.fetched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());

        match self.responses.get(url) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err((status, body))) => Err(DapError::transport(url, Some(*status), body.clone())),
            None => Err(DapError::transport(url, Some(404), "Not Found")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_transport_records_requests() {
        let mut transport = MemoryTransport::new();
        transport.insert("http://test/a.dds", "Dataset { } a;");

        let body = transport.fetch("http://test/a.dds", &[]).await.unwrap();
        assert_eq!(&body[..], b"Dataset { } a;");
        assert!(transport.fetch("http://test/missing.dds", &[]).await.is_err());
        assert_eq!(
            transport.fetched(),
            vec!["http://test/a.dds".to_string(), "http://test/missing.dds".to_string()]
        );
    }

    #[tokio::test]
    async fn test_error_status_is_transport_error() {
        let mut transport = MemoryTransport::new();
        transport.insert_error("http://test/x.dods", 403, "Error { message = \"denied\"; }");

        match transport.fetch("http://test/x.dods", &[]).await {
            Err(DapError::Transport { status, message, .. }) => {
                assert_eq!(status, Some(403));
                assert!(message.contains("denied"));
            }
            other => panic!("expected a transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_many_preserves_order_and_isolates_failures() {
        let mut transport = MemoryTransport::new();
        transport.insert("u1", "one").insert("u3", "three");

        let urls = vec!["u1".to_string(), "u2".to_string(), "u3".to_string()];
        let results = transport.fetch_many(&urls).await;

        assert_eq!(results.len(), 3);
        assert_eq!(&results[0].as_ref().unwrap()[..], b"one");
        assert!(results[1].is_err());
        assert_eq!(&results[2].as_ref().unwrap()[..], b"three");
    }

    #[test]
    fn test_http_transport_builds_from_config() {
        let config = ClientConfig::default();
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.max_concurrency(), config.max_concurrency);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
