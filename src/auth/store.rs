// Credential store
// Sole owner of the persisted token pair and of the renewal timer

use chrono::Utc;
use std::sync::{Mutex, MutexGuard};

use super::scheduler::{RenewalScheduler, RestoreAction};
use super::storage::{open_media, Media, StorageConfig, StorageKind, StoredTokens};
use super::types::TokenPair;
use crate::error::Result;

/// Tokens closer than this to expiry are not considered valid (5 minutes)
pub const VALIDITY_BUFFER_MS: i64 = 5 * 60 * 1000;

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Whether a token expiring at `expires_at_ms` is still usable at `now_ms`
pub fn is_within_validity(expires_at_ms: i64, now_ms: i64) -> bool {
    expires_at_ms > now_ms.saturating_add(VALIDITY_BUFFER_MS)
}

/// Durable token storage with proactive renewal arming
pub struct CredentialStore {
    media: Mutex<Media>,
    kind: StorageKind,
    scheduler: RenewalScheduler,
}

impl CredentialStore {
    /// Select the storage medium once and attach the scheduler
    pub fn open(config: &StorageConfig, scheduler: RenewalScheduler) -> Self {
        let media = open_media(config);
        let kind = media.active.kind();
        Self {
            media: Mutex::new(media),
            kind,
            scheduler,
        }
    }

    /// Medium selected at construction
    pub fn backend_kind(&self) -> StorageKind {
        self.kind
    }

    /// Renewal scheduler owned by this store
    pub fn scheduler(&self) -> &RenewalScheduler {
        &self.scheduler
    }

    /// Store a new pair, derive its absolute expiry and arm proactive renewal
    pub fn set_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in_secs: u64,
    ) -> Result<TokenPair> {
        let now = now_ms();
        let lifetime_ms = i64::try_from(expires_in_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        let pair = TokenPair {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at_ms: now.saturating_add(lifetime_ms),
        };

        self.lock().active.store_pair(&pair, now)?;
        self.scheduler.schedule(expires_in_secs);

        tracing::debug!("Stored new token pair, expires at {}", pair.expires_at_ms);
        Ok(pair)
    }

    /// Current access token, if any
    pub fn access_token(&self) -> Option<String> {
        self.snapshot(now_ms()).access_token
    }

    /// Current refresh token, if any
    pub fn refresh_token(&self) -> Option<String> {
        self.snapshot(now_ms()).refresh_token
    }

    /// Absolute expiry of the current access token
    pub fn expires_at_ms(&self) -> Option<i64> {
        self.snapshot(now_ms()).expires_at_ms
    }

    /// `Set-Cookie` values mirroring the session when the cookie medium is active
    pub fn cookie_headers(&self) -> Vec<String> {
        self.lock().active.set_cookie_headers(now_ms())
    }

    /// True iff a token exists and expires more than 5 minutes from now
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(now_ms())
    }

    /// Validity check against an explicit clock
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        let tokens = self.snapshot(now_ms);
        match (tokens.access_token, tokens.expires_at_ms) {
            (Some(_), Some(expires_at)) => is_within_validity(expires_at, now_ms),
            _ => false,
        }
    }

    /// Remove all credentials from both media and cancel the renewal timer
    pub fn clear(&self) {
        {
            let mut media = self.lock();
            if let Err(e) = media.active.clear() {
                tracing::warn!("Failed to clear {} token storage: {}", self.kind, e);
            }
            if let Some(standby) = media.standby.as_mut() {
                if let Err(e) = standby.clear() {
                    tracing::warn!("Failed to clear standby token storage: {}", e);
                }
            }
        }
        self.scheduler.disarm();
        tracing::debug!("Credentials cleared");
    }

    /// Re-arm renewal from persisted state at process start
    pub fn restore(&self) -> RestoreAction {
        let now = now_ms();
        let tokens = self.snapshot(now);
        let action = self.scheduler.restore(
            tokens.expires_at_ms,
            tokens.refresh_token.is_some(),
            now,
        );
        match action {
            RestoreAction::Scheduled(delay) => {
                tracing::info!("Restored session, renewal in {}s", delay.as_secs())
            }
            RestoreAction::ImmediateRenewal(_) => {
                tracing::info!("Stored access token expired, renewing shortly")
            }
            RestoreAction::Idle => tracing::debug!("No session to restore"),
        }
        action
    }

    fn snapshot(&self, now_ms: i64) -> StoredTokens {
        match self.lock().active.load(now_ms) {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!("Failed to read {} token storage: {}", self.kind, e);
                StoredTokens::default()
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Media> {
        self.media.lock().unwrap_or_else(|e| e.into_inner())
    }
}
