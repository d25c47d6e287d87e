use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Request, Response, StatusCode};
use serde::Serialize;

use crate::auth::{is_auth_endpoint, SessionCoordinator};
use crate::error::{AuthError, Result};

/// HTTP client that authorizes outbound calls through the session coordinator
#[derive(Clone)]
pub struct AuthHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Session coordinator
    session: SessionCoordinator,
}

impl AuthHttpClient {
    /// Create a client sharing the coordinator's connection pool
    pub fn new(session: SessionCoordinator) -> Self {
        Self {
            client: session.client().clone(),
            session,
        }
    }

    /// Session this client authorizes with
    pub fn session(&self) -> &SessionCoordinator {
        &self.session
    }

    /// Absolute URL for a backend path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.session.base_url(), path)
    }

    /// GET a backend path
    pub async fn get(&self, path: &str) -> Result<Response> {
        let request = self.client.get(self.url(path)).build()?;
        self.execute(request).await
    }

    /// POST a JSON body to a backend path
    pub async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        let request = self.client.post(self.url(path)).json(body).build()?;
        self.execute(request).await
    }

    /// Execute a request with credential handling
    /// - auth endpoints: sent unmodified, never intercepted
    /// - others: bearer token attached; on 401, renew once and replay once
    pub async fn execute(&self, mut request: Request) -> Result<Response> {
        let method = request.method().clone();
        let url = request.url().clone();

        if is_auth_endpoint(url.path()) {
            tracing::debug!(method = %method, url = %url, "Sending auth endpoint request");
            return Ok(self.client.execute(request).await?);
        }

        let sent_token = self.session.access_token();
        if let Some(token) = sent_token.as_deref() {
            set_bearer(&mut request, token)?;
        }
        let replay = request.try_clone();

        tracing::debug!(method = %method, url = %url, "Sending HTTP request");
        let response = self.client.execute(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::warn!(method = %method, url = %url, "Received 401, renewing credentials");
        // Renewal (or session teardown) happens even when the body cannot be replayed
        let token = self
            .session
            .handle_unauthorized(sent_token.as_deref())
            .await?;

        let Some(mut replay) = replay else {
            return Err(AuthError::RequestNotReplayable);
        };
        set_bearer(&mut replay, &token)?;

        let response = self.client.execute(replay).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::error!(
                method = %method,
                url = %url,
                "Request still unauthorized after renewal"
            );
            return Err(AuthError::UnauthorizedAfterRetry {
                url: url.to_string(),
            });
        }

        Ok(response)
    }
}

fn set_bearer(request: &mut Request, token: &str) -> Result<()> {
    let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| AuthError::Transport("Access token is not a valid header value".to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}
