//! Item Fetcher Library
//!
//! Fetches per-item information from an HTTP resource for a stream of item
//! keys, using a fixed pool of concurrent workers, per-item retries with a
//! fixed backoff schedule, and deduplication so each distinct key ends in
//! exactly one terminal outcome.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`fetch`] - HTTP client issuing one authorized GET per attempt
//! - [`engine`] - Worker pool, work queue, retry coordinator and completion tracking
//! - [`server`] - Failure-injecting item server used for local runs and tests

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod engine;
pub mod fetch;
pub mod server;

// Re-export commonly used types
pub use engine::{
    DEFAULT_BACKOFF_SCHEDULE, DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS, DedupRegistry,
    EngineConfig, EngineError, FetchEngine, ItemOutcome, ItemReport, RetryPolicy, RunReport,
    RunSession, fetch_items,
};
pub use fetch::{FetchError, FetchResponse, Fetcher, HttpClient, authorization_token};
