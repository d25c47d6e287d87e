// Session coordinator
// Owns the renewal state machine: one renewal per episode, shared by every waiter

use reqwest::Client;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast;

use super::refresh;
use super::scheduler::{RenewalScheduler, RenewalTiming, RenewalTrigger, RestoreAction};
use super::storage::StorageConfig;
use super::store::CredentialStore;
use super::types::{SessionEndReason, SessionEvent, TokenPair, TokenResponse};
use crate::error::{AuthError, Result};

/// Capacity of the session event channel
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Outcome broadcast to every waiter of a renewal episode
type RenewalOutcome = std::result::Result<String, AuthError>;

/// Settings for a session coordinator
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Backend base URL, e.g. `https://api.example.com`
    pub base_url: String,
    pub storage: StorageConfig,
    pub timing: RenewalTiming,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl SessionConfig {
    /// Defaults for everything but the base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            storage: StorageConfig::default(),
            timing: RenewalTiming::default(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// A running renewal
struct Episode {
    outcome_tx: broadcast::Sender<RenewalOutcome>,
    /// Set once any rejected request waits on this episode; failure then ends the session
    reactive: bool,
    /// Session generation the episode was started in
    generation: u64,
}

enum RenewalState {
    Idle,
    InFlight(Episode),
}

/// Renewal state and session generation, guarded together
struct Renewal {
    state: RenewalState,
    /// Bumped whenever the session ends; older episodes discard their result
    generation: u64,
}

/// Why a renewal is requested
#[derive(Clone, Copy)]
enum RenewalMode<'a> {
    /// Timer-driven or explicit renewal; failure keeps the credentials
    Proactive,
    /// A request was rejected after being sent with `sent_token`
    Reactive { sent_token: Option<&'a str> },
}

/// Result of asking for a renewal
enum Joined {
    /// Wait for the episode's broadcast
    Wait(broadcast::Receiver<RenewalOutcome>),
    /// A renewal already completed since the request was sent
    Current(String),
    /// No refresh token on record
    NoRefreshToken,
}

struct Inner {
    store: CredentialStore,
    client: Client,
    base_url: String,
    renewal: Mutex<Renewal>,
    events: broadcast::Sender<SessionEvent>,
}

/// Credential lifecycle coordinator
///
/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    /// Build a coordinator, selecting the storage medium once
    pub fn new(config: SessionConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let base_url = config.base_url.trim_end_matches('/').to_string();

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let trigger: Weak<dyn RenewalTrigger> = weak.clone();
            let scheduler = RenewalScheduler::new(config.timing, trigger);
            Inner {
                store: CredentialStore::open(&config.storage, scheduler),
                client,
                base_url,
                renewal: Mutex::new(Renewal {
                    state: RenewalState::Idle,
                    generation: 0,
                }),
                events,
            }
        });

        Ok(Self { inner })
    }

    /// Re-arm renewal from persisted credentials; call once at startup
    pub fn start(&self) -> RestoreAction {
        self.inner.store.restore()
    }

    /// Credential store backing this session
    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    /// Shared HTTP client
    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Backend base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Current access token, if any
    pub fn access_token(&self) -> Option<String> {
        self.inner.store.access_token()
    }

    /// Whether the session holds a token valid beyond the safety buffer
    pub fn is_authenticated(&self) -> bool {
        self.inner.store.is_valid()
    }

    /// Delay of the pending proactive renewal
    pub fn pending_renewal(&self) -> Option<Duration> {
        self.inner.store.scheduler().pending_delay()
    }

    /// Subscribe to renewal and session-end events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Log in and store the issued pair
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair> {
        let tokens = refresh::login(&self.inner.client, &self.inner.base_url, email, password)
            .await?;
        let pair = self.inner.store_response(&tokens)?;
        tracing::info!("Logged in as {}", email);
        Ok(pair)
    }

    /// Register an account and store the issued pair
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<TokenPair> {
        let tokens = refresh::register(
            &self.inner.client,
            &self.inner.base_url,
            email,
            password,
            name,
        )
        .await?;
        let pair = self.inner.store_response(&tokens)?;
        tracing::info!("Registered {}", email);
        Ok(pair)
    }

    /// Revoke the refresh token (best effort) and end the session
    pub async fn logout(&self) {
        if let Some(refresh_token) = self.inner.store.refresh_token() {
            if let Err(e) =
                refresh::logout(&self.inner.client, &self.inner.base_url, &refresh_token).await
            {
                tracing::warn!("Backend logout failed, clearing local session anyway: {}", e);
            }
        }
        self.inner.end_session(SessionEndReason::LoggedOut);
    }

    /// Renew now, joining a renewal already in flight
    ///
    /// Failure leaves the stored credentials untouched.
    pub async fn renew(&self) -> Result<String> {
        self.inner.renew(RenewalMode::Proactive).await
    }

    /// Recover from a `401` on a request that was sent with `sent_token`
    ///
    /// Returns the token to replay the request with. Terminal failures
    /// clear the session and emit `SessionEvent::SessionEnded`.
    pub async fn handle_unauthorized(&self, sent_token: Option<&str>) -> Result<String> {
        self.inner
            .renew(RenewalMode::Reactive { sent_token })
            .await
    }
}

impl Inner {
    fn store_response(&self, tokens: &TokenResponse) -> Result<TokenPair> {
        self.store
            .set_tokens(&tokens.access_token, &tokens.refresh_token, tokens.expires_in)
    }

    fn renewal(&self) -> MutexGuard<'_, Renewal> {
        self.renewal.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn end_session(&self, reason: SessionEndReason) {
        let mut renewal = self.renewal();
        self.end_session_locked(&mut renewal, reason);
    }

    /// Clear credentials and start a new generation; caller holds the renewal lock
    fn end_session_locked(&self, renewal: &mut Renewal, reason: SessionEndReason) {
        renewal.generation = renewal.generation.wrapping_add(1);
        self.store.clear();
        tracing::warn!("Session ended: {:?}", reason);
        // No subscribers is fine
        let _ = self.events.send(SessionEvent::SessionEnded { reason });
    }

    async fn renew(self: &Arc<Self>, mode: RenewalMode<'_>) -> Result<String> {
        let reactive = matches!(mode, RenewalMode::Reactive { .. });

        let mut rx = match self.join_or_start(mode) {
            Joined::Wait(rx) => rx,
            Joined::Current(token) => return Ok(token),
            Joined::NoRefreshToken => {
                if reactive {
                    self.end_session(SessionEndReason::NoRefreshToken);
                }
                return Err(AuthError::NoRefreshToken);
            }
        };

        match rx.recv().await {
            Ok(outcome) => outcome,
            Err(e) => Err(AuthError::Transport(format!(
                "Renewal ended without a result: {}",
                e
            ))),
        }
    }

    /// Join the in-flight episode or start one; the only place a renewal begins
    fn join_or_start(self: &Arc<Self>, mode: RenewalMode<'_>) -> Joined {
        let mut renewal = self.renewal();

        if let RenewalState::InFlight(episode) = &mut renewal.state {
            if matches!(mode, RenewalMode::Reactive { .. }) {
                episode.reactive = true;
            }
            tracing::debug!("Renewal in flight, waiting for its result");
            return Joined::Wait(episode.outcome_tx.subscribe());
        }

        // Idle. Episodes store the new pair before returning to Idle, so a
        // stored token that differs from the rejected one is already fresh.
        if let RenewalMode::Reactive { sent_token } = mode {
            if let Some(current) = self.store.access_token() {
                if sent_token != Some(current.as_str()) {
                    tracing::debug!("Request used a superseded token, replaying with current");
                    return Joined::Current(current);
                }
            }
        }

        let Some(refresh_token) = self.store.refresh_token() else {
            return Joined::NoRefreshToken;
        };

        let (outcome_tx, rx) = broadcast::channel(1);
        let generation = renewal.generation;
        renewal.state = RenewalState::InFlight(Episode {
            outcome_tx,
            reactive: matches!(mode, RenewalMode::Reactive { .. }),
            generation,
        });
        drop(renewal);

        // Runs detached so a dropped waiter never cancels the network call
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.run_episode(refresh_token).await;
        });

        Joined::Wait(rx)
    }

    async fn run_episode(self: Arc<Self>, refresh_token: String) {
        tracing::info!("Renewing access token...");

        let fetched = refresh::refresh_tokens(&self.client, &self.base_url, &refresh_token).await;

        // Settle under the lock so nobody joins a finished episode, starts a
        // new one against credentials about to be cleared, or ends the
        // session between the generation check and the store
        let (episode, outcome) = {
            let mut renewal = self.renewal();
            let episode = match std::mem::replace(&mut renewal.state, RenewalState::Idle) {
                RenewalState::InFlight(episode) => episode,
                RenewalState::Idle => {
                    tracing::error!("Renewal finished while no episode was recorded");
                    return;
                }
            };

            if renewal.generation != episode.generation {
                tracing::info!("Session ended during renewal, discarding refreshed tokens");
                // A login after the session ended may already have stored a new pair
                let outcome = self.store.access_token().ok_or(AuthError::SessionEnded);
                (episode, outcome)
            } else {
                let outcome = fetched.and_then(|tokens| {
                    self.store_response(&tokens).map(|pair| pair.access_token)
                });

                match &outcome {
                    Ok(_) => {
                        tracing::info!("✅ Access token renewed");
                        let _ = self.events.send(SessionEvent::Renewed);
                    }
                    Err(e) if episode.reactive => {
                        tracing::error!("Token renewal failed: {}", e);
                        self.end_session_locked(&mut renewal, SessionEndReason::RenewalFailed);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Proactive renewal failed, keeping current credentials: {}",
                            e
                        );
                    }
                }
                (episode, outcome)
            }
        };

        let _ = episode.outcome_tx.send(outcome);
    }
}

impl RenewalTrigger for Inner {
    fn trigger_renewal(self: Arc<Self>) {
        if self.store.refresh_token().is_none() {
            tracing::debug!("Renewal timer fired without a refresh token, skipping");
            return;
        }
        tokio::spawn(async move {
            if let Err(e) = self.renew(RenewalMode::Proactive).await {
                tracing::debug!("Scheduled renewal did not complete: {}", e);
            }
        });
    }
}
