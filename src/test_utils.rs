use std::sync::{Arc, Mutex};

use crate::Client;
use crate::builder::ClientBuilder;
use crate::config::ClientConfig;
use std::time::Duration;
use watacore::backoff::RetryPolicy;
use watacore::net::{HttpClient, HttpRequest, HttpResponse};
use watacore::session::Session;
use watacore::sync::SyncState;
use watacore::types::UserId;

type Handler = dyn Fn(&HttpRequest) -> anyhow::Result<HttpResponse> + Send + Sync;

/// Answers every request with `handler` and records what it saw.
pub struct MockHttpClient {
    handler: Box<Handler>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttpClient {
    pub fn new(
        handler: impl Fn(&HttpRequest) -> anyhow::Result<HttpResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn ok_empty() -> Self {
        Self::new(|_| Ok(HttpResponse::json(200, &serde_json::json!({}))?))
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        let response = (self.handler)(&request);
        self.requests.lock().unwrap().push(request);
        response
    }
}

#[derive(Debug, Clone, Default)]
pub struct FailingMockHttpClient;

#[async_trait::async_trait]
impl HttpClient for FailingMockHttpClient {
    async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        Err(anyhow::anyhow!("connection refused"))
    }
}

/// Never answers in time.
#[derive(Debug, Clone, Default)]
pub struct SlowHttpClient;

#[async_trait::async_trait]
impl HttpClient for SlowHttpClient {
    async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        HttpResponse::json(200, &serde_json::json!({}))
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        homeserver_url: "http://hs.test".into(),
        long_poll_timeout: Duration::from_millis(50),
        request_timeout: Duration::from_secs(2),
        wait_timeout: Duration::from_secs(2),
        backoff: RetryPolicy {
            base: Duration::from_millis(10),
            factor: 2.0,
            max: Duration::from_millis(50),
            jitter: false,
        },
        ..ClientConfig::default()
    }
}

pub fn create_test_client(http: Arc<dyn HttpClient>) -> Arc<Client> {
    ClientBuilder::new()
        .with_config(test_config())
        .with_shared_http_client(http)
        .build()
}

/// Installs a session and empty folded state without starting the sync task.
pub async fn install_session(client: &Client, user_id: &str) {
    let user = UserId::parse(user_id).unwrap();
    let state = SyncState::new(user.clone(), "http://hs.test", "#family:hs.test".into());
    *client.sync_state.write().await = Some(state);
    *client.session.write().await = Some(Session {
        user_id: user,
        device_id: "TESTDEVICE".into(),
        access_token: "token".into(),
        homeserver_url: "http://hs.test".into(),
        refresh_token: None,
    });
}
