//! Request dispatch.
//!
//! `request -> classify -> middleware chain -> validate -> handler -> envelope`
//!
//! Classification happens before the chain so conditional units (the auth
//! gate, rate limits, per-route timeouts) can see the matched route. An
//! unmatched request still runs the chain, which lets CORS answer preflights
//! and the logging unit record it; the terminal step then answers
//! `ROUTE_NOT_FOUND`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Map, Value, json};
use tracing::{debug, error};

use crate::audit::AuditSink;
use crate::auth::{AuthResolver, AuthResolverConfig, AuthResult};
use crate::config::Config;
use crate::context::RequestContext;
use crate::error::ErrorCode;
use crate::handlers::{HandlerInput, HandlerRegistry, default_handlers};
use crate::intent::{ExecutionPlanner, IntentClassifier, Resolution, ResolvedIntent, TimeoutTable, ToolInvoker};
use crate::middleware::{
    AuthGate, CorsMiddleware, Endpoint, LoggingMiddleware, MiddlewareChain, RateLimitMiddleware, TimeoutMiddleware,
    requires_auth,
};
use crate::routing::{HttpMethod, RouteDefinition, RouteParams, RouteRegistry, RouteSchema, default_routes, default_schemas};
use crate::validation::{
    InputValidator, InputValidatorConfig, OutputValidator, OutputValidatorConfig, ResponseEnvelope, ValidateOptions,
    ValidationError, ValidationResult,
};
use crate::{Error, Result};

/// A request travelling through the dispatcher
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Method
    pub method: HttpMethod,
    /// Path without query string
    pub path: String,
    /// Request headers
    pub headers: HeaderMap,
    /// Query parameters
    pub query: Map<String, Value>,
    /// Parsed JSON body (`{}` when absent)
    pub body: Value,
    /// Request-scoped context
    pub context: RequestContext,
    /// Classified intent and route match; `None` when no route matched
    pub resolution: Option<Resolution>,
    /// Auth outcome, set by the auth gate
    pub auth: Option<AuthResult>,
}

impl DispatchRequest {
    /// Request for `path`, which may carry a query string
    #[must_use]
    pub fn new(method: HttpMethod, path: &str) -> Self {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (path, Map::new()),
        };
        Self {
            method,
            path: path.to_string(),
            headers: HeaderMap::new(),
            query,
            body: Value::Object(Map::new()),
            context: RequestContext::new(method.as_str(), path, "internal"),
            resolution: None,
            auth: None,
        }
    }

    /// Add a header. Invalid names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::from_str(value)) {
            self.headers.append(name, value);
        }
        self
    }

    /// Replace the body
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Replace the context
    #[must_use]
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Classified intent
    #[must_use]
    pub fn intent(&self) -> Option<&ResolvedIntent> {
        self.resolution.as_ref().map(|r| &r.intent)
    }

    /// Matched route definition
    #[must_use]
    pub fn route(&self) -> Option<&RouteDefinition> {
        self.resolution.as_ref().map(|r| r.matched.definition())
    }

    /// Extracted path parameters
    #[must_use]
    pub fn params(&self) -> Option<&RouteParams> {
        self.resolution.as_ref().map(|r| &r.matched.params)
    }
}

/// Parse a query string into string values
#[must_use]
pub fn parse_query(query: &str) -> Map<String, Value> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(query)
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect()
}

/// Response produced by the chain
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    /// HTTP status
    pub status: StatusCode,
    /// Extra response headers
    pub headers: HeaderMap,
    /// Envelope; `None` for bodiless responses such as preflights
    pub body: Option<ResponseEnvelope>,
}

impl DispatchResponse {
    /// Response carrying `envelope`, with the status it implies
    #[must_use]
    pub fn from_envelope(envelope: ResponseEnvelope) -> Self {
        Self {
            status: envelope.status(),
            headers: HeaderMap::new(),
            body: Some(envelope),
        }
    }

    /// Bodiless response
    #[must_use]
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Response for an error that escaped the chain
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        Self::from_envelope(ResponseEnvelope::err(error.code(), error.public_message()))
    }

    /// Error code, if the envelope is a failure
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.body.as_ref().and_then(ResponseEnvelope::error_code)
    }
}

impl IntoResponse for DispatchResponse {
    fn into_response(self) -> Response {
        match self.body {
            Some(body) => (self.status, self.headers, Json(body)).into_response(),
            None => (self.status, self.headers).into_response(),
        }
    }
}

/// Turns requests into responses
pub struct Dispatcher {
    classifier: IntentClassifier,
    chain: MiddlewareChain,
    input: Arc<InputValidator>,
    output: Arc<OutputValidator>,
    handlers: HandlerRegistry,
    schemas: HashMap<String, RouteSchema>,
}

impl Dispatcher {
    /// Dispatcher with an empty chain, default validators and no schemas
    #[must_use]
    pub fn new(classifier: IntentClassifier, handlers: HandlerRegistry) -> Self {
        Self {
            classifier,
            chain: MiddlewareChain::new(),
            input: Arc::new(InputValidator::default()),
            output: Arc::new(OutputValidator::default()),
            handlers,
            schemas: HashMap::new(),
        }
    }

    /// Fully wired dispatcher: built-in routes plus configured ones, planner
    /// timeouts, validators, and the standard chain
    /// (logging, CORS, timeout, auth gate, rate limit).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate or a configured
    /// route does not compile.
    pub fn from_config(config: &Config, audit: Arc<dyn AuditSink>, tools: Arc<dyn ToolInvoker>) -> Result<Self> {
        config.validate()?;
        let registry = RouteRegistry::with_routes(default_routes().into_iter().chain(config.routes.iter().cloned()))?;
        let planner = ExecutionPlanner::new(TimeoutTable::from_config(&config.planner));
        let classifier = IntentClassifier::new(Arc::new(registry), planner);

        let resolver = Arc::new(AuthResolver::new(AuthResolverConfig::from_config(&config.auth), audit));
        let mut chain = MiddlewareChain::new().use_middleware(LoggingMiddleware);
        if config.cors.enabled {
            chain = chain.use_middleware(CorsMiddleware::new(config.cors.clone()));
        }
        chain = chain
            .use_middleware(TimeoutMiddleware::new(config.server.request_timeout))
            .use_when(requires_auth, AuthGate::new(resolver));
        if config.rate_limits.enabled {
            chain = chain.use_middleware(RateLimitMiddleware::new(&config.rate_limits));
        }
        let chain = chain.on_error(|e, ctx| {
            error!(correlation_id = %ctx.correlation_id, error = %e, "Request failed");
            DispatchResponse::from_error(&e)
        });

        Ok(Self::new(classifier, default_handlers(tools))
            .with_chain(chain)
            .with_input_validator(Arc::new(InputValidator::new(InputValidatorConfig::from(&config.validation))))
            .with_output_validator(Arc::new(OutputValidator::new(OutputValidatorConfig::from(&config.response))))
            .with_schemas(default_schemas()))
    }

    /// Replace the middleware chain
    #[must_use]
    pub fn with_chain(mut self, chain: MiddlewareChain) -> Self {
        self.chain = chain;
        self
    }

    /// Replace the input validator
    #[must_use]
    pub fn with_input_validator(mut self, input: Arc<InputValidator>) -> Self {
        self.input = input;
        self
    }

    /// Replace the output validator
    #[must_use]
    pub fn with_output_validator(mut self, output: Arc<OutputValidator>) -> Self {
        self.output = output;
        self
    }

    /// Replace route schemas (keyed by qualified action)
    #[must_use]
    pub fn with_schemas(mut self, schemas: HashMap<String, RouteSchema>) -> Self {
        self.schemas = schemas;
        self
    }

    /// Classifier in use
    #[must_use]
    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    /// Middleware chain in use
    #[must_use]
    pub fn chain(&self) -> &MiddlewareChain {
        &self.chain
    }

    /// Input validator in use
    #[must_use]
    pub fn input_validator(&self) -> &Arc<InputValidator> {
        &self.input
    }

    /// Output validator in use
    #[must_use]
    pub fn output_validator(&self) -> &Arc<OutputValidator> {
        &self.output
    }

    /// Dispatch one request. Never fails: every outcome is an envelope.
    pub async fn dispatch(&self, mut req: DispatchRequest) -> DispatchResponse {
        req.resolution = self.classifier.resolve(req.method, &req.path);
        if req.resolution.is_none() {
            debug!(correlation_id = %req.context.correlation_id, method = %req.method, path = %req.path, "No route matched");
        }

        let ctx = req.context.clone();
        let response = match self.chain.run(req, &Terminal { dispatcher: self }).await {
            Ok(response) => response,
            Err(e) => {
                error!(correlation_id = %ctx.correlation_id, error = %e, "Unhandled dispatch error");
                DispatchResponse::from_error(&e)
            }
        };

        let outcome = response.error_code().map_or("success", ErrorCode::as_str);
        telemetry_metrics::counter!("dispatch_requests_total", "outcome" => outcome).increment(1);

        self.finalize(response, &ctx)
    }

    fn finalize(&self, mut response: DispatchResponse, ctx: &RequestContext) -> DispatchResponse {
        if let Some(body) = response.body.take() {
            response.body = Some(self.output.finalize(body, ctx));
        }
        response
    }

    async fn handle_matched(&self, req: DispatchRequest) -> Result<DispatchResponse> {
        let Some(resolution) = req.resolution else {
            return Ok(DispatchResponse::from_envelope(ResponseEnvelope::err(
                ErrorCode::RouteNotFound,
                format!("No route for {} {}", req.method, req.path),
            )));
        };
        let intent = resolution.intent;
        let schema = self.schemas.get(&intent.qualified_action()).cloned().unwrap_or_default();

        let params = match self.input.validate_params::<Value>(&resolution.matched.params.to_json(), &schema.params) {
            ValidationResult::Success { data } => data,
            ValidationResult::Failure { message, errors } => return Ok(validation_failure(message, &errors)),
        };
        let query = match self.input.validate_query::<Value>(&Value::Object(req.query), &schema.query) {
            ValidationResult::Success { data } => data,
            ValidationResult::Failure { message, errors } => return Ok(validation_failure(message, &errors)),
        };
        let body = match self
            .input
            .validate_input::<Value>(&req.body, &schema.body, ValidateOptions::default())
        {
            ValidationResult::Success { data } => data,
            ValidationResult::Failure { message, errors } => return Ok(validation_failure(message, &errors)),
        };

        let Some(handler) = self.handlers.get(&intent) else {
            return Ok(DispatchResponse::from_envelope(ResponseEnvelope::err(
                ErrorCode::HandlerNotFound,
                format!("No handler for {}", intent.qualified_action()),
            )));
        };

        let context = req.context;
        let data = handler
            .handle(
                HandlerInput {
                    intent,
                    params,
                    query,
                    body,
                    auth: req.auth,
                },
                &context,
            )
            .await?;
        Ok(DispatchResponse::from_envelope(self.output.success(data, &context)))
    }
}

fn validation_failure(message: String, errors: &[ValidationError]) -> DispatchResponse {
    DispatchResponse::from_envelope(
        ResponseEnvelope::err(ErrorCode::ValidationError, message).with_details(json!({ "errors": errors })),
    )
}

struct Terminal<'a> {
    dispatcher: &'a Dispatcher,
}

#[async_trait]
impl Endpoint for Terminal<'_> {
    async fn call(&self, req: DispatchRequest) -> Result<DispatchResponse> {
        self.dispatcher.handle_matched(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::handlers::ToolRegistry;

    fn dispatcher() -> (Dispatcher, Arc<MemoryAuditSink>) {
        let audit = Arc::new(MemoryAuditSink::new());
        let d = Dispatcher::from_config(&Config::default(), audit.clone(), Arc::new(ToolRegistry::new())).unwrap();
        (d, audit)
    }

    #[test]
    fn request_splits_query_string() {
        let req = DispatchRequest::new(HttpMethod::Get, "/api/newsletters?limit=5&q=a%20b");
        assert_eq!(req.path, "/api/newsletters");
        assert_eq!(req.query["limit"], "5");
        assert_eq!(req.query["q"], "a b");
    }

    #[tokio::test]
    async fn unmatched_route_is_not_found() {
        let (d, _) = dispatcher();
        let resp = d.dispatch(DispatchRequest::new(HttpMethod::Get, "/api/nope")).await;
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        let body = resp.body.unwrap();
        assert_eq!(body.error_code(), Some(ErrorCode::RouteNotFound));
        assert!(body.meta.is_some());
    }

    #[tokio::test]
    async fn health_check_succeeds() {
        let (d, audit) = dispatcher();
        let req = DispatchRequest::new(HttpMethod::Get, "/api/health")
            .with_context(RequestContext::new("GET", "/api/health", "test").with_correlation_id("h1"));
        let resp = d.dispatch(req).await;

        assert_eq!(resp.status, StatusCode::OK);
        let body = resp.body.unwrap();
        assert_eq!(body.data.unwrap()["status"], "ok");
        assert_eq!(body.meta.unwrap().correlation_id, "h1");
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn preflight_answered_by_cors() {
        let (d, _) = dispatcher();
        let resp = d.dispatch(DispatchRequest::new(HttpMethod::Options, "/api/generateNewsletter")).await;
        assert_eq!(resp.status, StatusCode::NO_CONTENT);
        assert!(resp.body.is_none());
        assert_eq!(resp.headers["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn invalid_params_rejected() {
        let (d, _) = dispatcher();
        let long_id = "x".repeat(200);
        let resp = d
            .dispatch(DispatchRequest::new(HttpMethod::Get, &format!("/api/newsletters/{long_id}")))
            .await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        let body = resp.body.unwrap();
        assert_eq!(body.error_code(), Some(ErrorCode::ValidationError));
        assert_eq!(body.error.unwrap().details.unwrap()["errors"][0]["field"], "id");
    }

    #[tokio::test]
    async fn tool_failure_maps_to_tool_failed() {
        let (d, _) = dispatcher();
        let resp = d.dispatch(DispatchRequest::new(HttpMethod::Get, "/api/newsletters/abc")).await;
        assert_eq!(resp.status, StatusCode::BAD_GATEWAY);
        assert_eq!(resp.error_code(), Some(ErrorCode::ToolFailed));
    }
}
