//! Client identity for rate limit keys.

/// Header carrying the proxy chain; the first entry is the originating client.
pub const FORWARDED_FOR: &str = "x-forwarded-for";
/// Fallback key when the client cannot be identified.
pub const UNKNOWN_CLIENT: &str = "unknown";
/// Fallback key for handlers that treat unidentified callers as local.
pub const LOOPBACK_CLIENT: &str = "127.0.0.1";

/// Key for `forwarded_for` (an `X-Forwarded-For` value): its first comma-separated entry,
/// trimmed. Missing or blank values map to `fallback`.
///
/// ```rust
/// use callguard::rate_limit::{client_key, UNKNOWN_CLIENT};
///
/// assert_eq!(client_key(Some("203.0.113.7, 10.0.0.1"), UNKNOWN_CLIENT), "203.0.113.7");
/// assert_eq!(client_key(None, UNKNOWN_CLIENT), "unknown");
/// ```
pub fn client_key(forwarded_for: Option<&str>, fallback: &str) -> String {
    forwarded_for
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .unwrap_or(fallback)
        .to_string()
}
