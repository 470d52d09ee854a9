//! HTTP server
//!
//! Every request lands in a single fallback handler that turns it into a
//! [`DispatchRequest`]. Routing, auth, validation and envelopes all happen
//! inside the [`Dispatcher`], so the axum router carries no routes of its own.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::to_bytes;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::audit::build_sink;
use crate::config::Config;
use crate::context::{CORRELATION_HEADER, RequestContext};
use crate::dispatch::{DispatchRequest, DispatchResponse, Dispatcher, parse_query};
use crate::error::ErrorCode;
use crate::intent::ToolInvoker;
use crate::routing::HttpMethod;
use crate::validation::ResponseEnvelope;
use crate::{Error, Result};

/// Shared handler state
pub struct AppState {
    /// Request dispatcher
    pub dispatcher: Dispatcher,
    /// Maximum accepted body size in bytes
    pub max_body_size: usize,
    /// Honour `x-forwarded-for` for the client address
    pub trust_forwarded_for: bool,
}

/// Build the axum router around `state`
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(dispatch_handler)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new()),
        )
}

async fn dispatch_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let path = parts.uri.path().to_string();
    let mut context = RequestContext::from_headers(parts.method.as_str(), &path, &parts.headers, ip);
    if state.trust_forwarded_for {
        context = context.with_forwarded_client(&parts.headers);
    }
    let correlation_id = context.correlation_id.clone();

    let respond = |response: DispatchResponse| with_correlation_header(response, &correlation_id);

    let Ok(method) = parts.method.as_str().parse::<HttpMethod>() else {
        debug!(method = %parts.method, "Unsupported method");
        return respond(DispatchResponse::from_envelope(ResponseEnvelope::err(
            ErrorCode::RouteNotFound,
            format!("No route for {} {path}", parts.method),
        )));
    };

    let bytes = match to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(correlation_id = %correlation_id, error = %e, "Failed to read request body");
            return respond(DispatchResponse::from_envelope(ResponseEnvelope::err(
                ErrorCode::ValidationError,
                "Request body could not be read",
            )));
        }
    };
    let body = if bytes.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Map::new())
    } else {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(body) => body,
            Err(e) => {
                warn!(correlation_id = %correlation_id, error = %e, "Malformed JSON body");
                return respond(DispatchResponse::from_envelope(ResponseEnvelope::err(
                    ErrorCode::ValidationError,
                    "Request body is not valid JSON",
                )));
            }
        }
    };

    let mut req = DispatchRequest::new(method, &path).with_body(body).with_context(context);
    req.headers = parts.headers;
    req.query = parts.uri.query().map(parse_query).unwrap_or_default();

    respond(state.dispatcher.dispatch(req).await)
}

fn with_correlation_header(response: DispatchResponse, correlation_id: &str) -> Response {
    let mut response = response.into_response();
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

/// The HTTP front end
pub struct Server {
    config: Config,
    state: Arc<AppState>,
}

impl Server {
    /// Wire a dispatcher from `config`, invoking tools through `tools`
    ///
    /// # Errors
    ///
    /// Returns an error if the audit sink cannot be opened or the route table
    /// does not compile.
    pub async fn new(config: Config, tools: Arc<dyn ToolInvoker>) -> Result<Self> {
        let audit = build_sink(&config.audit).await?;
        let dispatcher = Dispatcher::from_config(&config, audit, tools)?;
        let max_body_size = config.server.max_body_size;
        let trust_forwarded_for = config.server.trust_forwarded_for;
        Ok(Self {
            config,
            state: Arc::new(AppState {
                dispatcher,
                max_body_size,
                trust_forwarded_for,
            }),
        })
    }

    /// Router for this server, for embedding or in-process tests
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Bind and serve until Ctrl+C or SIGTERM
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or serving fails.
    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid listen address: {e}")))?;

        let app = self.router();
        let listener = TcpListener::bind(addr).await?;

        info!(
            version = env!("CARGO_PKG_VERSION"),
            host = %self.config.server.host,
            port = self.config.server.port,
            routes = self.state.dispatcher.classifier().registry().len(),
            middleware = ?self.state.dispatcher.chain().names(),
            "Listening"
        );

        let grace = self.config.server.shutdown_timeout;
        let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
        let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                let _ = signalled_tx.send(());
            })
            .into_future();
        tokio::pin!(server);

        // In-flight requests get `shutdown_timeout` to drain
        tokio::select! {
            result = &mut server => result.map_err(|e| Error::Internal(e.to_string()))?,
            () = async {
                if signalled_rx.await.is_ok() {
                    tokio::time::sleep(grace).await;
                } else {
                    std::future::pending::<()>().await;
                }
            } => {
                let grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
                warn!(grace_ms, "Shutdown grace period elapsed, dropping open connections");
            }
        }

        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
