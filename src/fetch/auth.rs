//! Authorization token derivation.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;

/// Builds the `Authorization` header value for an item key.
///
/// The value is the URL-safe base64 encoding of the raw key bytes, with
/// padding kept.
#[must_use]
pub fn authorization_token(item_key: &str) -> String {
    URL_SAFE.encode(item_key.as_bytes())
}
