//! Mock authentication backend for integration tests.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Password accepted by `/auth/login`
pub const PASSWORD: &str = "secret";

/// Shared, test-adjustable backend state
pub struct BackendState {
    /// Lifetime handed out with each issued pair
    pub expires_in: AtomicU64,
    /// Artificial latency of `/auth/refresh`
    pub refresh_delay_ms: AtomicU64,
    /// Status forced on `/auth/refresh` (200 means "behave normally")
    pub refresh_status: AtomicU16,
    /// Reject every protected request regardless of token
    pub reject_all: AtomicBool,

    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub profile_calls: AtomicUsize,
    /// Set when an auth endpoint receives an Authorization header
    pub auth_endpoint_saw_bearer: AtomicBool,

    issued: AtomicU64,
    access_tokens: Mutex<HashSet<String>>,
    refresh_tokens: Mutex<HashSet<String>>,
}

impl BackendState {
    fn new() -> Self {
        Self {
            expires_in: AtomicU64::new(3600),
            refresh_delay_ms: AtomicU64::new(0),
            refresh_status: AtomicU16::new(200),
            reject_all: AtomicBool::new(false),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
            auth_endpoint_saw_bearer: AtomicBool::new(false),
            issued: AtomicU64::new(0),
            access_tokens: Mutex::new(HashSet::new()),
            refresh_tokens: Mutex::new(HashSet::new()),
        }
    }

    /// Issue a new pair and register both tokens as valid
    pub fn issue(&self, email: &str) -> Value {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let expires_in = self.expires_in.load(Ordering::SeqCst);
        let access = signed_token(n, email, expires_in);
        let refresh = format!("refresh-{}", n);

        self.access_tokens.lock().unwrap().insert(access.clone());
        self.refresh_tokens.lock().unwrap().insert(refresh.clone());

        json!({
            "accessToken": access,
            "refreshToken": refresh,
            "expiresIn": expires_in,
            "tokenType": "Bearer"
        })
    }

    /// Invalidate all access tokens, as if they had expired server-side
    pub fn expire_access_tokens(&self) {
        self.access_tokens.lock().unwrap().clear();
    }

    /// Invalidate all refresh tokens
    pub fn revoke_refresh_tokens(&self) {
        self.refresh_tokens.lock().unwrap().clear();
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }
}

/// Build a `header.payload.signature` token with a decodable payload
fn signed_token(n: u64, email: &str, expires_in: u64) -> String {
    let now = chrono::Utc::now().timestamp();
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        json!({
            "sub": "user-1",
            "email": email,
            "iat": now,
            "exp": now + expires_in as i64,
            "jti": n
        })
        .to_string(),
    );
    format!("{}.{}.sig{}", header, payload, n)
}

/// Mock backend bound to an ephemeral local port
pub struct MockBackend {
    state: Arc<BackendState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    port: u16,
}

impl MockBackend {
    /// Start the backend and wait until it accepts connections
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let state = Arc::new(BackendState::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let app = Router::new()
            .route("/auth/login", post(handle_login))
            .route("/auth/register", post(handle_login))
            .route("/auth/refresh", post(handle_refresh))
            .route("/auth/logout", post(handle_logout))
            .route("/api/profile", get(handle_profile))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            state,
            shutdown_tx: Some(shutdown_tx),
            port,
        }
    }

    pub fn state(&self) -> &BackendState {
        &self.state
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

fn note_bearer(state: &BackendState, headers: &HeaderMap) {
    if headers.contains_key(header::AUTHORIZATION) {
        state.auth_endpoint_saw_bearer.store(true, Ordering::SeqCst);
    }
}

async fn handle_login(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    note_bearer(&state, &headers);
    if body["password"] != PASSWORD {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Invalid credentials" })),
        )
            .into_response();
    }
    let email = body["email"].as_str().unwrap_or_default();
    Json(state.issue(email)).into_response()
}

async fn handle_refresh(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    note_bearer(&state, &headers);
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);

    // The outcome is committed before the artificial latency, so a session
    // ended during the delay races against an already rotated pair
    let forced = state.refresh_status.load(Ordering::SeqCst);
    let response = if forced != 200 {
        let status = StatusCode::from_u16(forced).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "message": "Refresh rejected" }))).into_response()
    } else {
        let token = body["refreshToken"].as_str().unwrap_or_default().to_string();
        if state.refresh_tokens.lock().unwrap().remove(&token) {
            Json(state.issue("user@example.com")).into_response()
        } else {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "message": "Unknown refresh token" })),
            )
                .into_response()
        }
    };

    let delay = state.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    response
}

async fn handle_logout(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    note_bearer(&state, &headers);
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(token) = body["refreshToken"].as_str() {
        state.refresh_tokens.lock().unwrap().remove(token);
    }
    StatusCode::NO_CONTENT
}

async fn handle_profile(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    state.profile_calls.fetch_add(1, Ordering::SeqCst);

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let authorized = !state.reject_all.load(Ordering::SeqCst)
        && token
            .as_ref()
            .is_some_and(|t| state.access_tokens.lock().unwrap().contains(t));

    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Unauthorized" })),
        )
            .into_response();
    }

    Json(json!({ "id": "user-1", "email": "user@example.com" })).into_response()
}
