//! Constants for the fetch module (timeouts, identification).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (60 seconds).
pub const READ_TIMEOUT_SECS: u64 = 60;

/// User-Agent sent with every item request.
pub const USER_AGENT: &str = concat!("item-fetcher/", env!("CARGO_PKG_VERSION"));
