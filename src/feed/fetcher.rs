use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;

/// Errors that can occur while downloading a feed.
///
/// Retrying is never done here; the scheduler simply reaches the feed
/// again on a later tick.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[source] reqwest::Error),
    /// The request did not complete within the caller's timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the configured size limit
    #[error("Response larger than {0} bytes")]
    ResponseTooLarge(usize),
}

/// Bounded HTTP GET for feed documents.
///
/// Cloning is cheap; the underlying `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl Fetcher {
    /// Build a fetcher that identifies itself with `user_agent` and refuses
    /// bodies over `max_bytes`.
    pub fn new(user_agent: &str, max_bytes: usize) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(FetchError::Network)?;
        Ok(Self { client, max_bytes })
    }

    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        Self::new(&config.user_agent, config.max_feed_bytes)
    }

    /// Download `url`, failing with [`FetchError::Timeout`] if the whole
    /// exchange (connect, headers and body) takes longer than `timeout`.
    pub async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        let exchange = async {
            let response = self.client.get(url).send().await.map_err(classify)?;

            // Surface error pages instead of handing them to the parser
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            read_limited_bytes(response, self.max_bytes).await
        };

        let bytes = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| FetchError::Timeout(timeout))??;

        tracing::debug!(url = %url, bytes = bytes.len(), "Feed downloaded");
        Ok(bytes)
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        // Only reachable if a client-level timeout is ever configured
        return FetchError::Timeout(Duration::ZERO);
    }
    FetchError::Network(err)
}

async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, FetchError> {
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(classify)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
