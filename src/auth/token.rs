//! JWT inspection.
//!
//! Tokens are issued and signed by the backend. The front-end only reads the
//! payload to decide when to refresh, so signatures are not verified here.

use std::collections::HashSet;

use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;

/// Refresh tokens that expire within this many seconds.
pub const DEFAULT_REFRESH_LEEWAY_SECS: u64 = 300;

/// Claims the front-end cares about.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    /// Expiration time (UNIX timestamp).
    #[serde(default)]
    pub exp: Option<u64>,
    /// Subject as issued by the backend's JWT library.
    #[serde(default, deserialize_with = "string_or_number")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub sub: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Decode the payload of `token` without checking its signature or expiry.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    match decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation) {
        Ok(data) => Some(data.claims),
        Err(e) => {
            tracing::debug!(error = %e, "Invalid token");
            None
        }
    }
}

/// Expiration time of `token`, if it is a well-formed JWT carrying `exp`.
pub fn token_expiry(token: &str) -> Option<u64> {
    decode_claims(token)?.exp
}

/// Identifier of the token's owner (`user_id`, else `sub`).
pub fn token_subject(token: &str) -> Option<String> {
    let claims = decode_claims(token)?;
    claims.user_id.or(claims.sub)
}

/// Whether `token` must be refreshed at `now` (UNIX seconds).
///
/// Malformed tokens and tokens without `exp` count as expired.
pub fn is_token_expired(token: &str, now: u64, leeway_secs: u64) -> bool {
    match token_expiry(token) {
        Some(exp) => exp < now.saturating_add(leeway_secs),
        None => true,
    }
}

/// Current UNIX time in seconds.
pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}
