// Error handling module
// Defines the error taxonomy surfaced by the credential lifecycle

use thiserror::Error;

/// Errors surfaced to callers of the session coordinator
///
/// Cloneable so a single renewal outcome can be broadcast to every waiter.
/// Malformed tokens and an unavailable primary storage medium are recovered
/// locally and never appear here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Renewal attempted with no refresh token on record
    #[error("No refresh token available")]
    NoRefreshToken,

    /// Backend answered the refresh call with a non-2xx status
    #[error("Token renewal rejected: {status} - {message}")]
    RenewalRejected { status: u16, message: String },

    /// Backend refused a login or registration
    #[error("Authentication rejected: {status} - {message}")]
    LoginRejected { status: u16, message: String },

    /// Request still rejected after one renewal-and-retry cycle
    #[error("Unauthorized after token renewal: {url}")]
    UnauthorizedAfterRetry { url: String },

    /// Session ended (e.g. logout) while a renewal was in flight
    #[error("Session ended while token renewal was in flight")]
    SessionEnded,

    /// Request was rejected but its body cannot be replayed
    #[error("Request body is not cloneable, cannot retry after renewal")]
    RequestNotReplayable,

    /// Network or decoding failure talking to the backend
    #[error("Transport error: {0}")]
    Transport(String),

    /// Storage medium read/write failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Whether this error ends the session (redirect to the entry point)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthError::NoRefreshToken
                | AuthError::RenewalRejected { .. }
                | AuthError::SessionEnded
        )
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connection_failed"
        } else if err.is_decode() {
            "decode_error"
        } else if err.is_body() {
            "body_error"
        } else {
            "request_error"
        };
        AuthError::Transport(format!("{} (kind: {})", err, kind))
    }
}

impl From<rusqlite::Error> for AuthError {
    fn from(err: rusqlite::Error) -> Self {
        AuthError::Storage(err.to_string())
    }
}

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, AuthError>;
