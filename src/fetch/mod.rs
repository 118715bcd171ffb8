//! HTTP fetch client for per-item info lookups.
//!
//! This module provides the [`Fetcher`] seam used by the engine and its
//! production implementation, [`HttpClient`], which issues one authorized
//! GET per call and reports the status and body of the exchange.
//!
//! # Behavior
//!
//! - `Authorization` header is the base64url encoding of the item key
//! - The target URL is `base_url + item_key` (plain concatenation)
//! - Non-2xx statuses are returned as normal [`FetchResponse`] values
//! - Only transport-level problems surface as [`FetchError`]
//!
//! # Example
//!
//! ```no_run
//! use item_fetcher::fetch::{Fetcher, HttpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new();
//! let response = client.fetch("http://localhost:8080/items/", "42").await?;
//! println!("status {}: {}", response.status, response.body_text());
//! # Ok(())
//! # }
//! ```

mod auth;
mod client;
mod constants;
mod error;

pub use auth::authorization_token;
pub use client::{FetchResponse, Fetcher, HttpClient};
pub use error::FetchError;
