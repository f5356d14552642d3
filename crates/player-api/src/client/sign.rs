//! Request signing for the player API.
//!
//! The API expects every form to carry a `time` field and a `sign` field:
//! the remaining fields sorted by key, joined as `k=v&k=v`, suffixed with the
//! shared secret and hashed with MD5 (lowercase hex).

use md5::{Digest, Md5};

/// Current time in milliseconds since the epoch, as the API expects it.
pub fn timestamp_ms() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

/// Compute the signature over `fields` (which must not contain `sign`).
pub fn sign(fields: &[(&str, String)], secret: &str) -> String {
    let mut sorted: Vec<&(&str, String)> = fields.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let payload = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Md5::new();
    hasher.update(payload.as_bytes());
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Add `time` and `sign` to `fields`, returning the complete form body.
pub fn signed_form(mut fields: Vec<(&'static str, String)>, secret: &str) -> Vec<(&'static str, String)> {
    fields.push(("time", timestamp_ms()));
    let signature = sign(&fields, secret);
    fields.push(("sign", signature));
    fields
}
