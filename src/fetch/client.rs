//! HTTP client wrapper for item lookups.
//!
//! This module provides the [`Fetcher`] trait consumed by the engine's
//! workers and the reqwest-backed [`HttpClient`] implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, ClientBuilder};
use tracing::{debug, instrument};
use url::Url;

use super::auth::authorization_token;
use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, USER_AGENT};
use super::error::FetchError;

/// Result of one completed HTTP exchange.
///
/// Any status code, including 4xx and 5xx, is a valid response here. The
/// engine decides what counts as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// HTTP status code.
    pub status: u16,
    /// Fully drained response body.
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// Creates a response from a status code and body bytes.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns the body as text, replacing invalid UTF-8 sequences.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A stateless item fetcher.
///
/// Implementations issue a single request per call and must not retry
/// internally; retries belong to the engine.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches the info for `item_key` from `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] only for transport-level failures.
    async fn fetch(&self, base_url: &str, item_key: &str) -> Result<FetchResponse, FetchError>;
}

/// HTTP client for item lookups.
///
/// This client is designed to be created once and shared by all workers,
/// taking advantage of connection pooling.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 30 seconds
    /// - Read timeout: 60 seconds
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a new HTTP client with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .read_timeout(Duration::from_secs(read_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Fetcher for HttpClient {
    #[instrument(level = "debug", skip(self), fields(url = tracing::field::Empty))]
    async fn fetch(&self, base_url: &str, item_key: &str) -> Result<FetchResponse, FetchError> {
        let target = format!("{base_url}{item_key}");
        tracing::Span::current().record("url", target.as_str());

        let url = Url::parse(&target).map_err(|_| FetchError::invalid_url(target.clone()))?;

        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, authorization_token(item_key))
            .send()
            .await
            .map_err(|e| FetchError::from_send(target.clone(), e))?;

        let status = response.status().as_u16();

        // Drain the body so the connection can go back to the pool
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_body(target.clone(), e))?;

        debug!(status, bytes = body.len(), "fetch complete");

        Ok(FetchResponse::new(status, body.to_vec()))
    }
}
