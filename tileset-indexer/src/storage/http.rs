//! HTTP provider for datasets served from a web server or CDN.

use super::{SourceReader, TileSource};
use crate::error::{IndexerError, Result};
use reqwest::Url;
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// User-Agent sent with every request.
const USER_AGENT: &str = concat!("tileset-indexer/", env!("CARGO_PKG_VERSION"));

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Fetches dataset files with one GET per open, relative to a base URL.
///
/// Transient failures are not retried here; the traversal engine wraps
/// every tile visit in its own retry.
#[derive(Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base: Url,
}

impl HttpSource {
    /// Creates a source rooted at `base_url` (the directory holding
    /// `tileset.json`).
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a source with a custom request timeout.
    pub fn with_timeout(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| IndexerError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Self::with_client(client, base_url)
    }

    /// Creates a source sharing an existing client.
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self> {
        // Url::join replaces the last segment unless the base ends with '/'
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base = Url::parse(&normalized)
            .map_err(|e| IndexerError::Http(format!("Invalid base URL {}: {}", base_url, e)))?;

        Ok(Self { client, base })
    }

    /// Absolute URL for a dataset-relative path.
    pub fn url_for(&self, path: &str) -> Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| IndexerError::Http(format!("Invalid path {}: {}", path, e)))
    }
}

impl TileSource for HttpSource {
    async fn open(&self, path: &str) -> Result<SourceReader> {
        let url = self.url_for(path)?;
        trace!(url = %url, "HTTP GET request starting");

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            warn!(
                url = %url,
                error = %e,
                is_connect = e.is_connect(),
                is_timeout = e.is_timeout(),
                "HTTP request failed"
            );
            IndexerError::Http(format!("Request failed for {}: {}", url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "HTTP error status");
            return Err(IndexerError::Http(format!("HTTP {} from {}", status, url)));
        }

        let bytes = response.bytes().await.map_err(|e| {
            IndexerError::Http(format!("Failed to read response from {}: {}", url, e))
        })?;
        debug!(url = %url, bytes = bytes.len(), "HTTP response body read");

        Ok(Box::new(Cursor::new(bytes.to_vec())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_relative_paths() {
        let source = HttpSource::new("https://example.com/datasets/13100_tokyo/bldg").unwrap();

        assert_eq!(
            source.url_for("tileset.json").unwrap().as_str(),
            "https://example.com/datasets/13100_tokyo/bldg/tileset.json"
        );
        assert_eq!(
            source.url_for("/data/0/1.b3dm").unwrap().as_str(),
            "https://example.com/datasets/13100_tokyo/bldg/data/0/1.b3dm"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpSource::new("not a url"),
            Err(IndexerError::Http(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_failure_is_http_error() {
        // Port 9 (discard) on localhost is expected to refuse connections
        let source = HttpSource::with_timeout("http://127.0.0.1:9/", 2).unwrap();
        let result = source.read_all("tileset.json").await;
        assert!(matches!(result, Err(IndexerError::Http(_))));
    }
}
