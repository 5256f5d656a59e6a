use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use ureq::Agent;
use watacore::net::{HttpClient, HttpRequest, HttpResponse, Method};

/// Upper bound for requests that don't set their own timeout. Must exceed the
/// longest sync long-poll.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// HTTP client implementation using `ureq` for synchronous HTTP requests.
/// Since `ureq` is blocking, all requests are wrapped in `tokio::task::spawn_blocking`.
#[derive(Debug, Clone)]
pub struct UreqHttpClient {
    agent: Agent,
}

impl UreqHttpClient {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            // Error statuses are responses, not transport failures.
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { agent }
    }
}

impl Default for UreqHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn execute_blocking(agent: &Agent, request: HttpRequest) -> Result<HttpResponse> {
    let response = match request.method {
        Method::Get => {
            let mut req = agent.get(&request.url);
            for (key, value) in &request.headers {
                req = req.header(key, value);
            }
            if let Some(timeout) = request.timeout {
                req = req.config().timeout_global(Some(timeout)).build();
            }
            req.call()?
        }
        Method::Post | Method::Put => {
            let mut req = if request.method == Method::Post {
                agent.post(&request.url)
            } else {
                agent.put(&request.url)
            };
            for (key, value) in &request.headers {
                req = req.header(key, value);
            }
            if let Some(timeout) = request.timeout {
                req = req.config().timeout_global(Some(timeout)).build();
            }
            match request.body {
                Some(body) => req.send(&body[..])?,
                None => req.send_empty()?,
            }
        }
    };

    let status_code = response.status().as_u16();
    let body = response.into_body().read_to_vec()?;
    Ok(HttpResponse { status_code, body })
}

#[async_trait]
impl HttpClient for UreqHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let agent = self.agent.clone();
        log::trace!(
            target: "Client/Http",
            "{} {}",
            request.method.as_str(),
            request.path()
        );
        // Since ureq is blocking, we must use spawn_blocking
        tokio::task::spawn_blocking(move || execute_blocking(&agent, request)).await?
    }
}
