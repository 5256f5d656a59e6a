use crate::client::{Client, ClientError};
use log::{trace, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::atomic::Ordering;
use thiserror::Error;
use tokio::time::timeout;
use watacore::api::{ErrorBody, errcode};
use watacore::net::{HttpRequest, HttpResponse};

/// Failure of a single homeserver call.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport failure: {0:#}")]
    Transport(anyhow::Error),
    #[error("server returned {status} {errcode}: {message}")]
    Status {
        status: u16,
        errcode: String,
        message: String,
        soft_logout: bool,
    },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("request timed out")]
    Timeout,
}

impl ApiError {
    pub fn from_response(response: &HttpResponse) -> Self {
        let body: ErrorBody = serde_json::from_slice(&response.body).unwrap_or_default();
        ApiError::Status {
            status: response.status_code,
            errcode: body.errcode,
            message: body.error,
            soft_logout: body.soft_logout,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn errcode(&self) -> Option<&str> {
        match self {
            ApiError::Status { errcode, .. } => Some(errcode),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404) || self.errcode() == Some(errcode::NOT_FOUND)
    }

    pub fn is_room_in_use(&self) -> bool {
        self.errcode() == Some(errcode::ROOM_IN_USE)
    }

    pub fn is_unknown_token(&self) -> bool {
        self.errcode() == Some(errcode::UNKNOWN_TOKEN)
    }

    /// The server could not be reached or did not answer in time.
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Transport(_) | ApiError::Timeout)
            || self.status().is_some_and(|s| s >= 500)
    }
}

/// Attaches `body` as JSON. Serializing our own request types only fails on
/// a bug, which surfaces as a transport error.
pub(crate) fn json_body<T: Serialize + ?Sized>(
    request: HttpRequest,
    body: &T,
) -> Result<HttpRequest, ApiError> {
    request.with_json(body).map_err(ApiError::Transport)
}

pub(crate) fn parse_json<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ApiError> {
    serde_json::from_slice(&response.body).map_err(|e| ApiError::MalformedResponse(e.to_string()))
}

impl Client {
    /// Generates a transaction id unique to this client instance.
    pub fn generate_txn_id(&self) -> String {
        let count = self.txn_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.unique_id, count)
    }

    /// Executes `request` with the session token attached. Non-2xx answers
    /// become [`ApiError::Status`].
    pub(crate) async fn send_request(
        &self,
        request: HttpRequest,
    ) -> Result<HttpResponse, ClientError> {
        let token = self.access_token().await?;
        let request = request.with_bearer(&token);
        Ok(self.execute_checked(request).await?)
    }

    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
    ) -> Result<T, ClientError> {
        let response = self.send_request(request).await?;
        Ok(parse_json(&response)?)
    }

    /// Executes `request` as is, bounded by its own timeout or the default.
    pub(crate) async fn execute_checked(
        &self,
        request: HttpRequest,
    ) -> Result<HttpResponse, ApiError> {
        let limit = request.timeout.unwrap_or(self.config.request_timeout);
        let method = request.method.as_str();
        let path = request.path().to_string();
        trace!(target: "Client/Request", "--> {method} {path}");
        let response = match timeout(limit, self.http_client.execute(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(target: "Client/Request", "{method} {path} failed: {e:#}");
                return Err(ApiError::Transport(e));
            }
            Err(_) => {
                warn!(target: "Client/Request", "{method} {path} timed out after {limit:?}");
                return Err(ApiError::Timeout);
            }
        };
        trace!(target: "Client/Request", "<-- {} {path}", response.status_code);
        if response.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_response(&response))
        }
    }
}
