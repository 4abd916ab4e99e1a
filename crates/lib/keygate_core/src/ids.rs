//! Identifier generation.
//!
//! Ticket ids, session ids and SAML ids are bearer secrets and come from
//! the OS-seeded thread RNG. Trade ids are correlation ids only.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use rand::RngCore;
use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}

/// `n` random bytes, URL-safe base64 without padding.
pub fn random_url_safe(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `prefix` followed by `n` random bytes, URL-safe encoded.
pub fn prefixed_token(prefix: &str, n: usize) -> String {
    format!("{prefix}{}", random_url_safe(n))
}

/// Correlation id of the form `{source}_{YYYYMMDDHHMMSS}_{8 hex}`.
pub fn trade_id(source: &str) -> String {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let mut tail = [0u8; 4];
    rand::rng().fill_bytes(&mut tail);
    let hex: String = tail.iter().map(|b| format!("{b:02x}")).collect();
    format!("{source}_{stamp}_{hex}")
}
