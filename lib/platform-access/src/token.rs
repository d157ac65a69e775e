//! Provider-issued tokens and unverified claim decoding.
//!
//! Tokens arrive over a direct server-to-server channel from the identity
//! provider, so their claims are read without signature verification. The
//! claims are only used for role extraction and lazy expiry checks.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::ClaimsError;

/// Decoded JWT claims.
pub type Claims = Map<String, Value>;

/// The credentials returned by a successful code exchange.
///
/// `Debug` output never includes token material.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

impl TokenSet {
    /// Creates a token set from an access token and optional refresh token.
    #[must_use]
    pub fn new(access_token: String, refresh_token: Option<String>) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_in: None,
        }
    }

    /// Records the provider's advertised lifetime in seconds.
    #[must_use]
    pub fn with_expires_in(mut self, expires_in: Option<u64>) -> Self {
        self.expires_in = expires_in;
        self
    }

    /// Returns the bearer access token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Returns the refresh token, if one was issued.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Returns the advertised lifetime in seconds, if the provider sent one.
    #[must_use]
    pub fn expires_in(&self) -> Option<u64> {
        self.expires_in
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Decodes the payload segment of a JWT without verifying it.
///
/// # Errors
///
/// Returns a [`ClaimsError`] if the token is not a three-segment JWT, the
/// payload is not base64url, or it does not decode to a JSON object.
pub fn decode_claims(token: &str) -> Result<Claims, ClaimsError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(ClaimsError::NotAJwt {
            segments: segments.len(),
        });
    }

    let payload = URL_SAFE_NO_PAD
        .decode(segments[1].trim_end_matches('='))
        .map_err(|e| ClaimsError::Encoding {
            details: e.to_string(),
        })?;

    match serde_json::from_slice::<Value>(&payload) {
        Ok(Value::Object(claims)) => Ok(claims),
        Ok(other) => Err(ClaimsError::Payload {
            details: format!("found {}", json_kind(&other)),
        }),
        Err(e) => Err(ClaimsError::Payload {
            details: e.to_string(),
        }),
    }
}

/// Returns the `exp` claim as a timestamp, if present and well-formed.
#[must_use]
pub fn expires_at(claims: &Claims) -> Option<DateTime<Utc>> {
    claims
        .get("exp")
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Builds an unsigned JWT around the given claims, for tests.
#[cfg(test)]
pub(crate) fn unsigned_jwt(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}
