// Backend authentication calls
// Login, registration, token refresh and logout

use reqwest::Client;
use serde::Serialize;

use super::types::{LoginRequest, LogoutRequest, RefreshRequest, RegisterRequest, TokenResponse};
use crate::error::{AuthError, Result};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Endpoints exempt from token attachment and 401 interception
pub const AUTH_ENDPOINTS: [&str; 4] = [LOGIN_PATH, REGISTER_PATH, REFRESH_PATH, LOGOUT_PATH];

/// Whether a request path targets one of the authentication endpoints
pub fn is_auth_endpoint(path: &str) -> bool {
    let path = path.trim_end_matches('/');
    AUTH_ENDPOINTS.iter().any(|endpoint| path.ends_with(endpoint))
}

/// Join the backend base URL and an endpoint path
pub fn endpoint_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Which call produced a rejection, for error mapping
#[derive(Debug, Clone, Copy)]
enum Call {
    Refresh,
    Login,
    Register,
}

async fn post_for_tokens<B: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    body: &B,
    call: Call,
) -> Result<TokenResponse> {
    let response = client.post(url).json(body).send().await?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        tracing::error!(
            status = status.as_u16(),
            url = %url,
            "{:?} request rejected: {}",
            call,
            message
        );
        return Err(match call {
            Call::Refresh => AuthError::RenewalRejected {
                status: status.as_u16(),
                message,
            },
            Call::Login | Call::Register => AuthError::LoginRejected {
                status: status.as_u16(),
                message,
            },
        });
    }

    let tokens: TokenResponse = response.json().await?;
    if tokens.access_token.is_empty() {
        return Err(AuthError::Transport(format!(
            "{:?} response does not contain accessToken",
            call
        )));
    }

    Ok(tokens)
}

/// Exchange a refresh token for a new token pair
pub async fn refresh_tokens(
    client: &Client,
    base_url: &str,
    refresh_token: &str,
) -> Result<TokenResponse> {
    let url = endpoint_url(base_url, REFRESH_PATH);
    tracing::debug!("Refreshing access token via {}", url);

    let tokens =
        post_for_tokens(client, &url, &RefreshRequest { refresh_token }, Call::Refresh).await?;

    tracing::info!("Token refreshed, expires in {}s", tokens.expires_in);
    Ok(tokens)
}

/// Authenticate with email and password
pub async fn login(
    client: &Client,
    base_url: &str,
    email: &str,
    password: &str,
) -> Result<TokenResponse> {
    let url = endpoint_url(base_url, LOGIN_PATH);
    tracing::debug!("Logging in as {}", email);
    post_for_tokens(client, &url, &LoginRequest { email, password }, Call::Login).await
}

/// Create an account and receive its first token pair
pub async fn register(
    client: &Client,
    base_url: &str,
    email: &str,
    password: &str,
    name: Option<&str>,
) -> Result<TokenResponse> {
    let url = endpoint_url(base_url, REGISTER_PATH);
    tracing::debug!("Registering {}", email);
    post_for_tokens(
        client,
        &url,
        &RegisterRequest {
            email,
            password,
            name,
        },
        Call::Register,
    )
    .await
}

/// Tell the backend to revoke a refresh token
pub async fn logout(client: &Client, base_url: &str, refresh_token: &str) -> Result<()> {
    let url = endpoint_url(base_url, LOGOUT_PATH);
    let response = client
        .post(&url)
        .json(&LogoutRequest { refresh_token })
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(AuthError::Transport(format!(
            "Logout failed: {} - {}",
            status, message
        )));
    }
    Ok(())
}
