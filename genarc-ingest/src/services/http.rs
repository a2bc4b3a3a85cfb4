//! HTTP fetch capability
//!
//! Adapters and the pipeline only see [`HttpFetch`]; [`ReqwestFetcher`] is the
//! production implementation. Tests substitute an in-memory fake.

use crate::error::FetchError;
use crate::model::Headers;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// GET with custom headers, either streamed to a file or decoded as JSON
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Stream the response body to `dest`; returns the number of bytes written
    async fn download(&self, url: &str, headers: &Headers, dest: &Path) -> Result<u64, FetchError>;

    /// Fetch and decode a JSON document
    async fn get_json(&self, url: &str, headers: &Headers) -> Result<Value, FetchError>;
}

/// reqwest-backed fetcher with a per-request timeout
pub struct ReqwestFetcher {
    http_client: Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { http_client })
    }

    async fn get(&self, url: &str, headers: &Headers) -> Result<reqwest::Response, FetchError> {
        let response = self
            .http_client
            .get(url)
            .headers(header_map(url, headers)?)
            .send()
            .await
            .map_err(|e| transport(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn download(&self, url: &str, headers: &Headers, dest: &Path) -> Result<u64, FetchError> {
        debug!(url, dest = %dest.display(), "Downloading");
        let mut response = self.get(url, headers).await?;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| transport(url, e))? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        debug!(url, bytes = written, "Download complete");
        Ok(written)
    }

    async fn get_json(&self, url: &str, headers: &Headers) -> Result<Value, FetchError> {
        debug!(url, "Fetching JSON");
        let response = self.get(url, headers).await?;
        response.json::<Value>().await.map_err(|e| transport(url, e))
    }
}

fn transport(url: &str, e: reqwest::Error) -> FetchError {
    FetchError::Transport {
        url: url.to_string(),
        message: e.to_string(),
    }
}

fn header_map(url: &str, headers: &Headers) -> Result<HeaderMap, FetchError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let invalid = |reason: String| FetchError::Transport {
            url: url.to_string(),
            message: format!("Invalid header {}: {}", name, reason),
        };
        let name_h = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
        let value_h = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
        map.insert(name_h, value_h);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_map_accepts_valid_headers() {
        let mut headers = Headers::new();
        headers.insert("Authorization".to_string(), "Bearer abc".to_string());
        let map = header_map("https://x", &headers).unwrap();
        assert_eq!(map.get("authorization").unwrap(), "Bearer abc");
    }

    #[test]
    fn test_header_map_rejects_invalid_name() {
        let mut headers = Headers::new();
        headers.insert("bad header".to_string(), "v".to_string());
        assert!(matches!(
            header_map("https://x", &headers),
            Err(FetchError::Transport { .. })
        ));
    }
}
