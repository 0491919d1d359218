use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::Deserialize;

use crate::types::is_admin_marker;

/// URL-safe base64 that accepts payload segments with or without padding.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Unverified claims read from an access token's payload segment.
///
/// Only good for optimistic decisions (scheduling, routing); the backend
/// remains the authority on whether a token is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[non_exhaustive]
pub struct Claims {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub authority: Option<String>,
    /// Expiry, Unix seconds.
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Claims {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        is_admin_marker(self.role.as_deref(), self.authority.as_deref())
    }

    /// Expiry in Unix milliseconds.
    #[must_use]
    pub fn expiration_ms(&self) -> Option<i64> {
        self.exp.map(|exp| exp.saturating_mul(1000))
    }

    /// Subject, then email, then a generic label.
    #[must_use]
    pub fn display_identity(&self) -> &str {
        self.sub
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("admin")
    }
}

/// Decodes the payload of a `header.payload.signature` token without
/// verifying it.
///
/// Returns `None` for anything that is not three dot-separated segments
/// with a base64url JSON object in the middle.
#[must_use]
pub fn decode(token: &str) -> Option<Claims> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };
    if payload.is_empty() {
        return None;
    }
    let bytes = PAYLOAD_ENGINE.decode(payload).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    if !value.is_object() {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// Expiry of `token` in Unix milliseconds, if it can be decoded.
#[must_use]
pub fn expiration_ms(token: &str) -> Option<i64> {
    decode(token)?.expiration_ms()
}

/// `true` once `now + skew_ms` reaches the token's expiry. Tokens without a
/// readable expiry count as expired.
#[must_use]
pub fn is_expired(token: &str, skew_ms: i64) -> bool {
    match expiration_ms(token) {
        Some(exp) => now_ms().saturating_add(skew_ms) >= exp,
        None => true,
    }
}

/// Wall-clock time in Unix milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}

/// Builds an unsigned token around `claims`. Used by tests and fakes.
#[cfg(test)]
pub(crate) fn encode_unsigned(claims: &serde_json::Value) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

/// Unsigned token with `role` expiring `ttl_secs` from now.
#[cfg(test)]
pub(crate) fn test_token(role: &str, ttl_secs: i64) -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT_JTI: AtomicU64 = AtomicU64::new(1);
    encode_unsigned(&serde_json::json!({
        "sub": "someone@example.com",
        "role": role,
        "exp": now_ms() / 1000 + ttl_secs,
        "jti": NEXT_JTI.fetch_add(1, Ordering::Relaxed),
    }))
}
