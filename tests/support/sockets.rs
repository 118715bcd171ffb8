//! Loopback servers for socket-bound tests.
//!
//! Sandboxed CI runners sometimes forbid binding sockets. Tests then skip
//! with a note on stderr, unless `ITEM_FETCHER_REQUIRE_SOCKET_TESTS` is set,
//! in which case they fail.

use item_fetcher::server::{ServerConfig, serve};
use tokio::net::TcpListener;
use wiremock::MockServer;

const REQUIRE_SOCKETS_ENV: &str = "ITEM_FETCHER_REQUIRE_SOCKET_TESTS";

fn sockets_required() -> bool {
    std::env::var(REQUIRE_SOCKETS_ENV)
        .is_ok_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Returns `true` if loopback sockets are unusable and the test should skip.
fn skip_without_loopback() -> bool {
    if std::net::TcpListener::bind("127.0.0.1:0").is_ok() {
        return false;
    }

    let test = std::thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string();
    assert!(
        !sockets_required(),
        "{test}: cannot bind a loopback socket and {REQUIRE_SOCKETS_ENV} is set"
    );
    eprintln!("{test}: cannot bind a loopback socket, skipping");
    true
}

/// Starts a wiremock server, or `None` when sockets are unavailable.
#[allow(dead_code)]
pub async fn mock_server() -> Option<MockServer> {
    if skip_without_loopback() {
        None
    } else {
        Some(MockServer::start().await)
    }
}

/// Item base URL (`.../items/`) served by `server`.
#[allow(dead_code)]
pub fn items_url(server: &MockServer) -> String {
    format!("{}/items/", server.uri())
}

/// Spawns the item server on a free loopback port and returns its item base
/// URL, or `None` when sockets are unavailable.
#[allow(dead_code)]
pub async fn item_server(config: ServerConfig) -> Option<String> {
    if skip_without_loopback() {
        return None;
    }
    let listener = TcpListener::bind("127.0.0.1:0").await.ok()?;
    let address = listener.local_addr().ok()?;
    tokio::spawn(serve(listener, config));
    Some(format!("http://{address}/items/"))
}
