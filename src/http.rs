//! Timeout-bounded HTTP GETs.
//!
//! Sources talk to the network through [`Fetch`] so tests can script
//! responses without a server.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

/// Errors from a single GET.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Issues GET requests with an explicit per-call timeout.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn get_string(&self, url: &str, timeout: Duration) -> Result<String>;

    async fn get_bytes(&self, url: &str, timeout: Duration) -> Result<Bytes>;
}

/// [`Fetch`] backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("mapsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client))
    }

    /// Use a preconfigured client, e.g. one with a proxy.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn send(&self, url: &str, timeout: Duration) -> Result<reqwest::Response> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn get_string(&self, url: &str, timeout: Duration) -> Result<String> {
        let response = self.send(url, timeout).await?;
        response.text().await.map_err(|e| classify(e, timeout))
    }

    async fn get_bytes(&self, url: &str, timeout: Duration) -> Result<Bytes> {
        let response = self.send(url, timeout).await?;

        let mut body = BytesMut::with_capacity(
            response.content_length().unwrap_or(0).min(64 * 1024 * 1024) as usize,
        );
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.map_err(|e| classify(e, timeout))?);
        }
        Ok(body.freeze())
    }
}

fn classify(e: reqwest::Error, timeout: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(timeout)
    } else if e.is_connect() {
        FetchError::Connect(e.to_string())
    } else {
        FetchError::Request(e)
    }
}
