//! Built-in middleware units

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use tracing::{debug, info, warn};

use super::chain::{Middleware, Next};
use crate::auth::{AuthOptions, AuthResolver};
use crate::config::CorsConfig;
use crate::dispatch::{DispatchRequest, DispatchResponse};
use crate::error::ErrorCode;
use crate::routing::HttpMethod;
use crate::validation::ResponseEnvelope;
use crate::Result;

/// Adds CORS headers and answers `OPTIONS` preflights with 204
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    config: CorsConfig,
}

impl CorsMiddleware {
    /// Create from configuration
    #[must_use]
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    fn allowed_origin(&self, request_headers: &HeaderMap) -> Option<HeaderValue> {
        if self.config.allowed_origins.iter().any(|o| o == "*") {
            return Some(HeaderValue::from_static("*"));
        }
        let origin = request_headers.get(header::ORIGIN)?;
        let origin_str = origin.to_str().ok()?;
        self.config
            .allowed_origins
            .iter()
            .any(|o| o == origin_str)
            .then(|| origin.clone())
    }

    fn apply(&self, origin: Option<HeaderValue>, headers: &mut HeaderMap, preflight: bool) {
        let Some(origin) = origin else {
            return;
        };
        let wildcard = origin == "*";
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        if !wildcard {
            headers.append(header::VARY, HeaderValue::from_static("origin"));
        }
        if preflight {
            if let Ok(v) = HeaderValue::from_str(&self.config.allowed_methods.join(", ")) {
                headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, v);
            }
            if let Ok(v) = HeaderValue::from_str(&self.config.allowed_headers.join(", ")) {
                headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, v);
            }
            headers.insert(
                header::ACCESS_CONTROL_MAX_AGE,
                HeaderValue::from(self.config.max_age.as_secs()),
            );
        }
    }
}

#[async_trait]
impl Middleware for CorsMiddleware {
    fn name(&self) -> &str {
        "cors"
    }

    async fn handle(&self, req: DispatchRequest, next: Next<'_>) -> Result<DispatchResponse> {
        let origin = self.allowed_origin(&req.headers);

        if req.method == HttpMethod::Options {
            let mut response = DispatchResponse::empty(StatusCode::NO_CONTENT);
            self.apply(origin, &mut response.headers, true);
            return Ok(response);
        }

        let mut response = next.run(req).await?;
        self.apply(origin, &mut response.headers, false);
        Ok(response)
    }
}

/// Aborts the rest of the chain after the route timeout (or the default)
/// and answers `TIMEOUT`
#[derive(Debug, Clone, Copy)]
pub struct TimeoutMiddleware {
    default: Duration,
}

impl TimeoutMiddleware {
    /// Use `default` for routes without their own timeout
    #[must_use]
    pub fn new(default: Duration) -> Self {
        Self { default }
    }
}

#[async_trait]
impl Middleware for TimeoutMiddleware {
    fn name(&self) -> &str {
        "timeout"
    }

    async fn handle(&self, req: DispatchRequest, next: Next<'_>) -> Result<DispatchResponse> {
        // A planned tool chain may run longer than the blanket default
        let planned = req.intent().map_or(Duration::ZERO, |i| i.execution_plan.total_timeout());
        let limit = req.route().and_then(|r| r.timeout).unwrap_or(self.default).max(planned);
        let correlation_id = req.context.correlation_id.clone();

        match tokio::time::timeout(limit, next.run(req)).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                warn!(correlation_id = %correlation_id, timeout_ms, "Request timed out");
                Ok(DispatchResponse::from_envelope(ResponseEnvelope::err(
                    ErrorCode::Timeout,
                    format!("Request timed out after {timeout_ms}ms"),
                )))
            }
        }
    }
}

/// Logs each request on completion
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(&self, req: DispatchRequest, next: Next<'_>) -> Result<DispatchResponse> {
        let method = req.method;
        let path = req.path.clone();
        let ctx = req.context.clone();
        debug!(correlation_id = %ctx.correlation_id, %method, path = %path, "Request received");

        let result = next.run(req).await;
        let duration_ms = u64::try_from(ctx.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &result {
            Ok(response) => info!(
                correlation_id = %ctx.correlation_id,
                %method,
                path = %path,
                status = response.status.as_u16(),
                duration_ms,
                "Request completed"
            ),
            Err(e) => warn!(
                correlation_id = %ctx.correlation_id,
                %method,
                path = %path,
                error = %e,
                duration_ms,
                "Request failed"
            ),
        }
        result
    }
}

/// Whether the matched route needs a credential. Predicate for [`AuthGate`].
#[must_use]
pub fn requires_auth(req: &DispatchRequest) -> bool {
    req.intent().is_some_and(|intent| intent.auth_required)
}

/// Resolves the route's credential; rejects with the auth error code or
/// records the identity on the request and continues
#[derive(Clone)]
pub struct AuthGate {
    resolver: Arc<AuthResolver>,
}

impl AuthGate {
    /// Gate backed by `resolver`
    #[must_use]
    pub fn new(resolver: Arc<AuthResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Middleware for AuthGate {
    fn name(&self) -> &str {
        "auth"
    }

    async fn handle(&self, mut req: DispatchRequest, next: Next<'_>) -> Result<DispatchResponse> {
        let Some(intent) = req.intent() else {
            return next.run(req).await;
        };
        let auth_type = intent.auth_type;
        let options = AuthOptions::from_context(&req.context).resource(intent.qualified_action());

        let result = self.resolver.resolve(&req.headers, auth_type, &options).await;
        if !result.valid {
            let (code, message) = result
                .error
                .map_or((ErrorCode::InternalError, "Authentication failed".to_string()), |e| {
                    (e.code, e.message)
                });
            return Ok(DispatchResponse::from_envelope(ResponseEnvelope::err(code, message)));
        }

        req.context.user_id.clone_from(&result.user_id);
        req.context.user_email.clone_from(&result.user_email);
        req.auth = Some(result);
        next.run(req).await
    }
}
