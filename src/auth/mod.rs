// Authentication module
// Manages the credential lifecycle: storage, proactive renewal and 401 recovery

mod coordinator;
mod refresh;
mod scheduler;
mod storage;
mod store;
mod types;

pub mod decoder;

pub use coordinator::{SessionConfig, SessionCoordinator};
pub use refresh::{is_auth_endpoint, AUTH_ENDPOINTS};
pub use scheduler::{renewal_delay, RenewalScheduler, RenewalTiming, RestoreAction};
pub use storage::{
    Cookie, CookieMedium, SqliteMedium, StorageConfig, StorageKind, StoredTokens, TokenMedium,
    DEFAULT_REFRESH_COOKIE_MAX_AGE,
};
pub use store::{is_within_validity, CredentialStore, VALIDITY_BUFFER_MS};
pub use types::{SessionEndReason, SessionEvent, TokenPair, TokenResponse};
