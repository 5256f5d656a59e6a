//! Password login and the session lifecycle around it.
//!
//! These functions talk to the homeserver directly and hold no state, so they
//! can be used without a running [`crate::Client`].

use log::{debug, info, warn};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use watacore::api::{self, LoginRequest, LoginResponse, RefreshRequest, RefreshResponse};
use watacore::net::{HttpClient, HttpRequest, HttpResponse};
use watacore::session::Session;
use watacore::types::UserId;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("homeserver unreachable: {0}")]
    ServerUnreachable(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("stored session is unusable: {0}")]
    InvalidStoredSession(String),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
}

async fn exchange(
    http: &dyn HttpClient,
    request: HttpRequest,
    limit: Duration,
) -> Result<HttpResponse, AuthError> {
    match timeout(limit, http.execute(request.with_timeout(limit))).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => Err(AuthError::ServerUnreachable(format!("{e:#}"))),
        Err(_) => Err(AuthError::Timeout(limit)),
    }
}

fn classify_failure(response: &HttpResponse) -> AuthError {
    match response.status_code {
        404 => AuthError::ServerUnreachable("login endpoint not found".into()),
        429 => AuthError::ServerUnreachable("rate limited".into()),
        400..=499 => AuthError::InvalidCredentials,
        status => AuthError::ServerUnreachable(format!("server error {status}")),
    }
}

/// Logs in with a password and returns a fresh session.
pub async fn login(
    http: &dyn HttpClient,
    homeserver_url: &str,
    username: &str,
    password: &str,
    device_name: Option<&str>,
    limit: Duration,
) -> Result<Session, AuthError> {
    let body = LoginRequest::password(username, password, device_name);
    let request = HttpRequest::post(api::login_url(homeserver_url))
        .with_json(&body)
        .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
    let response = exchange(http, request, limit).await?;
    if !response.is_success() {
        warn!(target: "Client/Auth", "Login for {username} rejected with {}", response.status_code);
        return Err(classify_failure(&response));
    }
    let parsed: LoginResponse = serde_json::from_slice(&response.body)
        .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
    let user_id = UserId::parse(parsed.user_id)
        .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
    if parsed.access_token.is_empty() {
        return Err(AuthError::MalformedResponse("empty access token".into()));
    }
    info!(target: "Client/Auth", "Logged in as {user_id} (device {})", parsed.device_id);
    Ok(Session {
        user_id,
        device_id: parsed.device_id,
        access_token: parsed.access_token,
        homeserver_url: homeserver_url.trim_end_matches('/').to_string(),
        refresh_token: parsed.refresh_token,
    })
}

/// Checks a persisted session before it is reused.
pub fn restore_session(stored: Session) -> Result<Session, AuthError> {
    if stored.access_token.is_empty() {
        return Err(AuthError::InvalidStoredSession("missing access token".into()));
    }
    if stored.device_id.is_empty() {
        return Err(AuthError::InvalidStoredSession("missing device id".into()));
    }
    if !stored.homeserver_url.starts_with("http://") && !stored.homeserver_url.starts_with("https://") {
        return Err(AuthError::InvalidStoredSession(format!(
            "bad homeserver url {:?}",
            stored.homeserver_url
        )));
    }
    debug!(target: "Client/Auth", "Restored session for {}", stored.user_id);
    Ok(stored)
}

/// Trades the refresh token for a new access token.
pub async fn refresh(
    http: &dyn HttpClient,
    session: &Session,
    limit: Duration,
) -> Result<Session, AuthError> {
    let Some(refresh_token) = session.refresh_token.clone() else {
        return Err(AuthError::InvalidCredentials);
    };
    let request = HttpRequest::post(api::refresh_url(&session.homeserver_url))
        .with_json(&RefreshRequest { refresh_token })
        .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
    let response = exchange(http, request, limit).await?;
    if !response.is_success() {
        return Err(classify_failure(&response));
    }
    let parsed: RefreshResponse = serde_json::from_slice(&response.body)
        .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
    info!(target: "Client/Auth", "Refreshed access token for {}", session.user_id);
    Ok(Session {
        access_token: parsed.access_token,
        refresh_token: parsed.refresh_token.or_else(|| session.refresh_token.clone()),
        ..session.clone()
    })
}

/// Invalidates the session's token on the server. A token the server no
/// longer knows counts as logged out.
pub async fn logout(
    http: &dyn HttpClient,
    session: &Session,
    limit: Duration,
) -> Result<(), AuthError> {
    let request = HttpRequest::post(api::logout_url(&session.homeserver_url))
        .with_bearer(&session.access_token)
        .with_json(&serde_json::json!({}))
        .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
    let response = exchange(http, request, limit).await?;
    if response.is_success() || response.status_code == 401 {
        Ok(())
    } else {
        Err(classify_failure(&response))
    }
}
