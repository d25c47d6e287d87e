// Bearer token payload decoding
// Display-only inspection; signatures are never checked

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Commonly displayed claims of a token payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenClaims {
    /// `exp` as a timestamp
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    /// `iat` as a timestamp
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat.and_then(|iat| DateTime::from_timestamp(iat, 0))
    }
}

/// Decode the payload segment of a `header.payload.signature` token
///
/// Returns `None` (and logs) on a wrong segment count, invalid base64 or a
/// payload that is not a JSON object.
pub fn decode(token: &str) -> Option<Value> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        tracing::warn!(
            "Malformed token: expected 3 segments, found {}",
            segments.len()
        );
        return None;
    }

    // Some issuers encode with the standard alphabet (`+`, `/`)
    let raw = segments[1].trim_end_matches('=');
    let bytes = match URL_SAFE_NO_PAD
        .decode(raw)
        .or_else(|_| STANDARD_NO_PAD.decode(raw))
    {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Malformed token: payload is not valid base64: {}", e);
            return None;
        }
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(payload @ Value::Object(_)) => Some(payload),
        Ok(_) => {
            tracing::warn!("Malformed token: payload is not a JSON object");
            None
        }
        Err(e) => {
            tracing::warn!("Malformed token: payload is not valid JSON: {}", e);
            None
        }
    }
}

/// Decode the payload into the common display claims
pub fn claims(token: &str) -> Option<TokenClaims> {
    let payload = decode(token)?;
    match serde_json::from_value(payload) {
        Ok(claims) => Some(claims),
        Err(e) => {
            tracing::warn!("Token payload has unexpected claim types: {}", e);
            None
        }
    }
}
