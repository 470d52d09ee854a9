//! Composable middleware chain.
//!
//! Units run strictly in registration order. Each one receives the request
//! and a [`Next`] handle; calling [`Next::run`] continues the chain, returning
//! a response without calling it terminates the chain. Conditional units
//! whose predicate is false are skipped as if absent.
//!
//! Every invocation ends in one [`Transition`]: `Continued`, `Terminated` or
//! `Errored`. Errors (and panics, converted to `Error::Internal`) go to the
//! `on_error` handler when one is registered and propagate otherwise.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use regex::Regex;
use tracing::{debug, error, warn};

use crate::context::RequestContext;
use crate::dispatch::{DispatchRequest, DispatchResponse};
use crate::routing::HttpMethod;
use crate::{Error, Result};

/// A request-processing unit
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Process `req`, calling `next.run(req)` to continue the chain
    async fn handle(&self, req: DispatchRequest, next: Next<'_>) -> Result<DispatchResponse>;
}

/// What runs once every unit has continued
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Produce the response
    async fn call(&self, req: DispatchRequest) -> Result<DispatchResponse>;
}

/// Turns an error escaping the chain into a response
pub type ErrorHandler = Arc<dyn Fn(Error, &RequestContext) -> DispatchResponse + Send + Sync>;

type Predicate = Arc<dyn Fn(&DispatchRequest) -> bool + Send + Sync>;

/// How a unit invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Called `next`
    Continued,
    /// Responded without calling `next`
    Terminated,
    /// Returned an error or panicked
    Errored,
}

/// Path condition for [`MiddlewareChain::use_path`]
#[derive(Debug, Clone)]
pub enum PathFilter {
    /// Path starts with the prefix
    Prefix(String),
    /// Path matches the regex
    Regex(Regex),
}

impl PathFilter {
    fn matches(&self, path: &str) -> bool {
        match self {
            Self::Prefix(prefix) => path.starts_with(prefix.as_str()),
            Self::Regex(re) => re.is_match(path),
        }
    }
}

impl From<&str> for PathFilter {
    fn from(prefix: &str) -> Self {
        Self::Prefix(prefix.to_string())
    }
}

impl From<Regex> for PathFilter {
    fn from(re: Regex) -> Self {
        Self::Regex(re)
    }
}

#[derive(Clone)]
struct Unit {
    name: String,
    condition: Option<Predicate>,
    middleware: Arc<dyn Middleware>,
}

impl Unit {
    fn applies(&self, req: &DispatchRequest) -> bool {
        self.condition.as_ref().is_none_or(|pred| pred(req))
    }
}

/// Handle to the rest of the chain
pub struct Next<'a> {
    units: &'a [Unit],
    endpoint: &'a dyn Endpoint,
    called: Arc<AtomicBool>,
}

impl<'a> Next<'a> {
    /// Continue with the next applicable unit, or the endpoint
    pub async fn run(self, req: DispatchRequest) -> Result<DispatchResponse> {
        self.called.store(true, Ordering::Relaxed);
        run_from(self.units, self.endpoint, req).await
    }
}

fn run_from<'a>(
    mut units: &'a [Unit],
    endpoint: &'a dyn Endpoint,
    req: DispatchRequest,
) -> BoxFuture<'a, Result<DispatchResponse>> {
    Box::pin(async move {
        while let Some((unit, rest)) = units.split_first() {
            units = rest;
            if !unit.applies(&req) {
                debug!(middleware = %unit.name, "Skipped (condition false)");
                continue;
            }

            let called = Arc::new(AtomicBool::new(false));
            let next = Next {
                units: rest,
                endpoint,
                called: Arc::clone(&called),
            };
            let outcome = AssertUnwindSafe(unit.middleware.handle(req, next))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(Error::Internal(panic_message(&*panic))));

            let transition = match &outcome {
                Err(_) => Transition::Errored,
                Ok(_) if called.load(Ordering::Relaxed) => Transition::Continued,
                Ok(_) => Transition::Terminated,
            };
            debug!(middleware = %unit.name, ?transition, "Middleware finished");
            return outcome;
        }
        endpoint.call(req).await
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("middleware panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("middleware panicked: {s}")
    } else {
        "middleware panicked".to_string()
    }
}

/// Ordered, conditionally-applied middleware units
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    units: Vec<Unit>,
    error_handler: Option<ErrorHandler>,
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("units", &self.names())
            .field("has_error_handler", &self.error_handler.is_some())
            .finish()
    }
}

impl MiddlewareChain {
    /// Empty chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, condition: Option<Predicate>, middleware: impl Middleware + 'static) -> Self {
        self.units.push(Unit {
            name: middleware.name().to_string(),
            condition,
            middleware: Arc::new(middleware),
        });
        self
    }

    /// Append an unconditional unit
    #[must_use]
    pub fn use_middleware(self, middleware: impl Middleware + 'static) -> Self {
        self.push(None, middleware)
    }

    /// Append a unit that runs only when `predicate` holds at execution time
    #[must_use]
    pub fn use_when<F>(self, predicate: F, middleware: impl Middleware + 'static) -> Self
    where
        F: Fn(&DispatchRequest) -> bool + Send + Sync + 'static,
    {
        self.push(Some(Arc::new(predicate)), middleware)
    }

    /// Append a unit scoped to matching paths
    #[must_use]
    pub fn use_path(self, filter: impl Into<PathFilter>, middleware: impl Middleware + 'static) -> Self {
        let filter = filter.into();
        self.use_when(move |req| filter.matches(&req.path), middleware)
    }

    /// Append a unit scoped to the given methods
    #[must_use]
    pub fn use_method(self, methods: &[HttpMethod], middleware: impl Middleware + 'static) -> Self {
        let methods = methods.to_vec();
        self.use_when(move |req| methods.contains(&req.method), middleware)
    }

    /// Install the error handler
    #[must_use]
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(Error, &RequestContext) -> DispatchResponse + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Append `other`'s units after ours. Our error handler wins; `other`'s
    /// is adopted only if we have none.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.units.extend(other.units);
        if self.error_handler.is_none() {
            self.error_handler = other.error_handler;
        }
        self
    }

    /// Number of units
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the chain has no units
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Unit names in order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.name.as_str()).collect()
    }

    /// Run `req` through every applicable unit and then `endpoint`
    ///
    /// # Errors
    ///
    /// Returns the error raised by a unit or the endpoint when no error
    /// handler is registered.
    pub async fn run(&self, req: DispatchRequest, endpoint: &dyn Endpoint) -> Result<DispatchResponse> {
        let ctx = req.context.clone();
        match run_from(&self.units, endpoint, req).await {
            Ok(response) => Ok(response),
            Err(e) => match &self.error_handler {
                Some(handler) => {
                    warn!(correlation_id = %ctx.correlation_id, error = %e, "Middleware chain error handled");
                    Ok(handler(e, &ctx))
                }
                None => {
                    error!(correlation_id = %ctx.correlation_id, error = %e, "Middleware chain error unhandled");
                    Err(e)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::validation::ResponseEnvelope;
    use axum::http::StatusCode;
    use parking_lot::Mutex;
    use serde_json::json;

    type Log = Arc<Mutex<Vec<u32>>>;

    struct Push {
        n: u32,
        log: Log,
        terminate: bool,
    }

    #[async_trait]
    impl Middleware for Push {
        async fn handle(&self, req: DispatchRequest, next: Next<'_>) -> Result<DispatchResponse> {
            self.log.lock().push(self.n);
            if self.terminate {
                return Ok(DispatchResponse::from_envelope(ResponseEnvelope::ok(json!({"stoppedAt": self.n}))));
            }
            next.run(req).await
        }
    }

    struct Fail;

    #[async_trait]
    impl Middleware for Fail {
        async fn handle(&self, _req: DispatchRequest, _next: Next<'_>) -> Result<DispatchResponse> {
            Err(Error::Internal("boom".to_string()))
        }
    }

    struct Panics;

    #[async_trait]
    impl Middleware for Panics {
        async fn handle(&self, _req: DispatchRequest, _next: Next<'_>) -> Result<DispatchResponse> {
            panic!("unit exploded")
        }
    }

    struct Echo(Log);

    #[async_trait]
    impl Endpoint for Echo {
        async fn call(&self, _req: DispatchRequest) -> Result<DispatchResponse> {
            self.0.lock().push(99);
            Ok(DispatchResponse::from_envelope(ResponseEnvelope::ok(json!("done"))))
        }
    }

    fn push(n: u32, log: &Log) -> Push {
        Push {
            n,
            log: Arc::clone(log),
            terminate: false,
        }
    }

    fn request(method: HttpMethod, path: &str) -> DispatchRequest {
        DispatchRequest::new(method, path)
    }

    #[tokio::test]
    async fn runs_in_registration_order() {
        let log: Log = Arc::default();
        let chain = MiddlewareChain::new()
            .use_middleware(push(1, &log))
            .use_middleware(push(2, &log))
            .use_middleware(push(3, &log));

        let resp = chain.run(request(HttpMethod::Get, "/"), &Echo(Arc::clone(&log))).await.unwrap();
        assert_eq!(*log.lock(), vec![1, 2, 3, 99]);
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn termination_stops_the_chain() {
        let log: Log = Arc::default();
        let chain = MiddlewareChain::new()
            .use_middleware(push(1, &log))
            .use_middleware(Push {
                n: 2,
                log: Arc::clone(&log),
                terminate: true,
            })
            .use_middleware(push(3, &log));

        chain.run(request(HttpMethod::Get, "/"), &Echo(Arc::clone(&log))).await.unwrap();
        assert_eq!(*log.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn conditional_units_skipped_without_side_effects() {
        let log: Log = Arc::default();
        let chain = MiddlewareChain::new()
            .use_when(|_| false, push(1, &log))
            .use_path("/api/", push(2, &log))
            .use_path(Regex::new(r"^/admin").unwrap(), push(3, &log))
            .use_method(&[HttpMethod::Post], push(4, &log))
            .use_method(&[HttpMethod::Get], push(5, &log));

        chain.run(request(HttpMethod::Get, "/api/x"), &Echo(Arc::clone(&log))).await.unwrap();
        assert_eq!(*log.lock(), vec![2, 5, 99]);
    }

    #[tokio::test]
    async fn errors_go_to_handler() {
        let log: Log = Arc::default();
        let chain = MiddlewareChain::new()
            .use_middleware(Fail)
            .use_middleware(push(2, &log))
            .on_error(|e, _ctx| {
                DispatchResponse::from_envelope(ResponseEnvelope::err(e.code(), e.public_message()))
            });

        let resp = chain.run(request(HttpMethod::Get, "/"), &Echo(Arc::clone(&log))).await.unwrap();
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn errors_propagate_without_handler() {
        let log: Log = Arc::default();
        let chain = MiddlewareChain::new().use_middleware(Fail);
        let err = chain.run(request(HttpMethod::Get, "/"), &Echo(log)).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn panics_are_caught() {
        let log: Log = Arc::default();
        let chain = MiddlewareChain::new()
            .use_middleware(Panics)
            .on_error(|e, _ctx| DispatchResponse::from_envelope(ResponseEnvelope::err(e.code(), e.public_message())));

        let resp = chain.run(request(HttpMethod::Get, "/"), &Echo(log)).await.unwrap();
        let body = resp.body.unwrap();
        assert_eq!(body.error_code(), Some(ErrorCode::InternalError));
        assert!(!body.error.unwrap().message.contains("exploded"));
    }

    #[tokio::test]
    async fn merge_preserves_both_orders() {
        let log: Log = Arc::default();
        let first = MiddlewareChain::new().use_middleware(push(1, &log)).use_middleware(push(2, &log));
        let second = MiddlewareChain::new().use_middleware(push(3, &log)).use_middleware(push(4, &log));
        let merged = first.merge(second);

        assert_eq!(merged.len(), 4);
        merged.run(request(HttpMethod::Get, "/"), &Echo(Arc::clone(&log))).await.unwrap();
        assert_eq!(*log.lock(), vec![1, 2, 3, 4, 99]);
    }
}
