//! Failure-injecting item server.
//!
//! A small HTTP service that the fetch engine can be pointed at. It behaves
//! like a flaky, rate-limited upstream:
//!
//! - `GET /items/:key` requires an `Authorization` header holding the
//!   base64url encoding of `key`, else 401
//! - more than `max_in_flight` concurrent item requests get 429
//! - a fraction `error_rate` of the remaining requests get 404
//! - everything else gets 200 with a random numeric body
//!
//! Every authorized request is held for `processing_delay` before the
//! response goes out, and counts toward the in-flight limit until then.
//!
//! # Example
//!
//! ```no_run
//! use item_fetcher::server::{ServerConfig, serve};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! serve(listener, ServerConfig::default()).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::IntoResponse,
    routing::get,
};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use rand::Rng;
use tokio::net::TcpListener;
use tracing::{debug, info, instrument};

/// Default number of concurrent item requests served before answering 429.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 5;

/// Default fraction of requests answered with 404.
pub const DEFAULT_ERROR_RATE: f64 = 0.2;

/// Default time each request is held before responding.
pub const DEFAULT_PROCESSING_DELAY: Duration = Duration::from_secs(2);

/// Exclusive upper bound for the random item info.
const MAX_ITEM_INFO: u64 = 100_000_000_000_000_000;

const USAGE: &str = "Usage: http://localhost:8080/items/<item_id>";

/// Server behaviour knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// In-flight requests allowed before 429.
    pub max_in_flight: usize,
    /// Probability in `0.0..=1.0` of a 404.
    pub error_rate: f64,
    /// Hold time for every authorized request.
    pub processing_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            error_rate: DEFAULT_ERROR_RATE,
            processing_delay: DEFAULT_PROCESSING_DELAY,
        }
    }
}

/// Shared state for the item routes.
#[derive(Debug, Clone)]
pub struct ServerState {
    config: Arc<ServerConfig>,
    in_flight: Arc<AtomicUsize>,
}

impl ServerState {
    /// Creates state for `config` with nothing in flight.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the number of item requests currently held.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Releases one in-flight slot when dropped, including when the client
/// disconnects mid-request.
struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl InFlightGuard {
    /// Takes a slot and returns the count including it.
    fn acquire(counter: &Arc<AtomicUsize>) -> (Self, usize) {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        (
            Self {
                counter: Arc::clone(counter),
            },
            now,
        )
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Builds the router.
///
/// # Routes
///
/// - `GET /` - Usage text
/// - `GET /items/:key` - Item info
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(usage))
        .route("/items/:key", get(get_item))
        .with_state(state)
}

/// Serves the item routes on `listener` until the task is dropped or the
/// listener fails.
///
/// # Errors
///
/// Returns an I/O error if accepting connections fails.
pub async fn serve(listener: TcpListener, config: ServerConfig) -> std::io::Result<()> {
    if let Ok(address) = listener.local_addr() {
        info!(
            %address,
            max_in_flight = config.max_in_flight,
            error_rate = config.error_rate,
            processing_delay_ms = config.processing_delay.as_millis(),
            "item server listening"
        );
    }
    axum::serve(listener, create_router(ServerState::new(config))).await
}

async fn usage() -> &'static str {
    USAGE
}

/// Returns `true` if `headers` carry the base64url encoding of `key`.
fn is_authorized(headers: &HeaderMap, key: &str) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| URL_SAFE.decode(value).ok())
        .is_some_and(|decoded| decoded == key.as_bytes())
}

#[instrument(skip(state, headers))]
async fn get_item(
    State(state): State<ServerState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !is_authorized(&headers, &key) {
        debug!("rejected unauthorized request");
        return (
            StatusCode::UNAUTHORIZED,
            "Invalid authorization: Authorization header must be base 64 encoded ID".to_string(),
        );
    }

    let (guard, now) = InFlightGuard::acquire(&state.in_flight);

    let response = if now > state.config.max_in_flight {
        debug!(in_flight = now, "too many requests");
        (
            StatusCode::TOO_MANY_REQUESTS,
            "429 Too Many Requests".to_string(),
        )
    } else {
        let mut rng = rand::thread_rng();
        if rng.gen_bool(state.config.error_rate.clamp(0.0, 1.0)) {
            debug!("injected error");
            (StatusCode::NOT_FOUND, "404 Random Error Occured".to_string())
        } else {
            (StatusCode::OK, rng.gen_range(0..MAX_ITEM_INFO).to_string())
        }
    };

    tokio::time::sleep(state.config.processing_delay).await;
    drop(guard);

    response
}
