// Authentication types

use serde::{Deserialize, Serialize};

/// Persisted key for the access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Persisted key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Persisted key for the absolute expiry (epoch milliseconds, decimal string)
pub const TOKEN_EXPIRY_KEY: &str = "token_expiry";

/// All persisted keys, in write order
pub const TOKEN_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, TOKEN_EXPIRY_KEY];

/// Stored credential set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry, computed once when the pair is stored
    pub expires_at_ms: i64,
}

/// Refresh request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Logout request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest<'a> {
    pub refresh_token: &'a str,
}

/// Login request body
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Register request body
#[derive(Debug, Serialize)]
pub struct RegisterRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
}

/// Token response returned by login, register and refresh
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Why the session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    /// The backend rejected a reactive renewal
    RenewalFailed,
    /// A request was rejected and no refresh token was on record
    NoRefreshToken,
    /// Explicit logout
    LoggedOut,
}

/// Events broadcast to session observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A renewal completed and a new access token is stored
    Renewed,
    /// The session is over; observers should return to the unauthenticated entry point
    SessionEnded { reason: SessionEndReason },
}
