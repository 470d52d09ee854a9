//! Per-request context threaded through every dispatch component

use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Header carrying a caller-supplied correlation id
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Request line details captured at ingress
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    /// HTTP method
    pub method: String,
    /// Request path (no query string)
    pub path: String,
    /// Client address, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// `User-Agent` header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Request-scoped context. Created once per inbound request and dropped when
/// the response is written.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// Identifier threaded through logs and audit entries
    pub correlation_id: String,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Monotonic start, for durations
    #[serde(skip)]
    pub start_time: Instant,
    /// Authenticated user id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Authenticated user email
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    /// Where the request came from (`http`, `cli`, `test`)
    pub source: String,
    /// Request line
    pub request: RequestInfo,
    /// Free-form metadata added by middleware
    pub metadata: Map<String, Value>,
}

impl RequestContext {
    /// Create a context with a fresh correlation id
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            start_time: Instant::now(),
            user_id: None,
            user_email: None,
            source: source.into(),
            request: RequestInfo {
                method: method.into(),
                path: path.into(),
                ip: None,
                user_agent: None,
            },
            metadata: Map::new(),
        }
    }

    /// Build a context from HTTP headers, reusing a caller correlation id if
    /// one was sent. `ip` is the peer address; forwarding headers are ignored.
    #[must_use]
    pub fn from_headers(method: &str, path: &str, headers: &HeaderMap, ip: Option<String>) -> Self {
        let mut ctx = Self::new(method, path, "http");
        if let Some(id) = header_str(headers, CORRELATION_HEADER).filter(|id| is_valid_correlation_id(id)) {
            ctx.correlation_id = id.to_string();
        }
        ctx.request.user_agent = header_str(headers, "user-agent").map(String::from);
        ctx.request.ip = ip;
        ctx
    }

    /// Replace the client address with the first `x-forwarded-for` entry.
    /// Callers must only use this behind a trusted proxy.
    #[must_use]
    pub fn with_forwarded_client(mut self, headers: &HeaderMap) -> Self {
        let forwarded = header_str(headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(client) = forwarded {
            self.request.ip = Some(client.to_string());
        }
        self
    }

    /// Override the correlation id
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// Time since the request entered the gateway
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Caller-supplied ids are echoed into logs, so keep them short and printable
fn is_valid_correlation_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
