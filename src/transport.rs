//! Compatibility layer in front of the HTTP client.
//!
//! Every outbound call goes through [`CompatHttpClient`]. It fixes URLs that
//! are malformed by construction and answers the push rules list locally,
//! which some homeservers don't implement. Everything else, error statuses
//! included, passes through untouched.

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use serde_json::json;
use std::borrow::Cow;
use std::sync::Arc;
use watacore::net::{HttpClient, HttpRequest, HttpResponse, Method};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShimConfig {
    /// Rewrite `.../path/?query` to `.../path?query`.
    pub rewrite_malformed_paths: bool,
    /// Answer `GET .../pushrules/` with an empty rule set.
    pub synthesize_push_rules: bool,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            rewrite_malformed_paths: true,
            synthesize_push_rules: true,
        }
    }
}

pub struct CompatHttpClient {
    inner: Arc<dyn HttpClient>,
    config: ShimConfig,
}

impl CompatHttpClient {
    pub fn new(inner: Arc<dyn HttpClient>, config: ShimConfig) -> Self {
        Self { inner, config }
    }
}

/// Drops a separator that directly precedes the query marker, and a query
/// marker with nothing after it. The root path is left alone.
pub fn normalize_url(url: &str) -> Cow<'_, str> {
    let Some(query_at) = url.find('?') else {
        return Cow::Borrowed(url);
    };
    let (head, query) = url.split_at(query_at);
    let authority_end = head.find("://").map_or(0, |i| i + 3);
    let path_start = head[authority_end..]
        .find('/')
        .map(|i| i + authority_end);
    let trailing_slash = head.ends_with('/') && path_start.is_some_and(|start| start < head.len() - 1);
    let empty_query = query.len() == 1;
    if !trailing_slash && !empty_query {
        return Cow::Borrowed(url);
    }
    let head = if trailing_slash { &head[..head.len() - 1] } else { head };
    let query = if empty_query { "" } else { query };
    Cow::Owned(format!("{head}{query}"))
}

/// `GET /_matrix/client/{r0,v3}/pushrules` with or without the trailing `/`.
fn is_push_rules_list(request: &HttpRequest) -> bool {
    if request.method != Method::Get {
        return false;
    }
    let path = request.path().trim_end_matches('/');
    path == "/_matrix/client/v3/pushrules" || path == "/_matrix/client/r0/pushrules"
}

pub fn empty_push_rules() -> serde_json::Value {
    json!({
        "global": {
            "content": [],
            "override": [],
            "room": [],
            "sender": [],
            "underride": []
        }
    })
}

#[async_trait]
impl HttpClient for CompatHttpClient {
    async fn execute(&self, mut request: HttpRequest) -> Result<HttpResponse> {
        if self.config.rewrite_malformed_paths {
            if let Cow::Owned(fixed) = normalize_url(&request.url) {
                debug!(target: "Client/Transport", "Rewrote request path to {}", fixed_path(&fixed));
                request.url = fixed;
            }
        }
        if self.config.synthesize_push_rules && is_push_rules_list(&request) {
            debug!(target: "Client/Transport", "Answering push rules request locally");
            return HttpResponse::json(200, &empty_push_rules());
        }
        self.inner.execute(request).await
    }
}

// Query strings may carry tokens; log the path only.
fn fixed_path(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
