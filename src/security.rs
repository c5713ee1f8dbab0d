use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

/// Header Telegram attaches to every webhook call when a secret was registered
pub const WEBHOOK_SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

/// Constant-time string comparison
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Whether the request carries the expected webhook secret.
pub fn webhook_secret_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|provided| constant_time_compare(provided, expected))
}
