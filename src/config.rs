use crate::transport::ShimConfig;
use std::time::Duration;
use watacore::backoff::RetryPolicy;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub homeserver_url: String,
    pub device_display_name: Option<String>,
    /// Timeline events per room requested by the first sync.
    pub initial_timeline_limit: u32,
    /// How long the server may hold an incremental sync open.
    pub long_poll_timeout: Duration,
    /// Default upper bound for a single request. Sync polls get
    /// `long_poll_timeout` on top of this.
    pub request_timeout: Duration,
    pub login_timeout: Duration,
    pub upload_timeout: Duration,
    /// Bound for the `wait_for_*` helpers and for write-then-observe waits.
    pub wait_timeout: Duration,
    /// Delay between sync retries while the connection is down.
    pub backoff: RetryPolicy,
    /// Attempts to resolve the family alias before giving up.
    pub alias_retry_attempts: u32,
    pub family_alias_localpart: String,
    pub auto_join_invites: bool,
    pub shim: ShimConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            homeserver_url: "http://localhost:8008".to_string(),
            device_display_name: Some("wata".to_string()),
            initial_timeline_limit: 20,
            long_poll_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(15),
            login_timeout: Duration::from_secs(15),
            upload_timeout: Duration::from_secs(60),
            wait_timeout: Duration::from_secs(10),
            backoff: RetryPolicy::default(),
            alias_retry_attempts: 5,
            family_alias_localpart: "family".to_string(),
            auto_join_invites: true,
            shim: ShimConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(homeserver_url: impl Into<String>) -> Self {
        Self {
            homeserver_url: homeserver_url.into(),
            ..Default::default()
        }
    }

    pub(crate) fn sync_request_timeout(&self) -> Duration {
        self.long_poll_timeout + self.request_timeout
    }
}
