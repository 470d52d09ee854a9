//! Error types for the dispatch gateway

use std::fmt;
use std::io;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for the dispatch gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Dispatch gateway errors.
///
/// These are the *unexpected* failures. Expected outcomes (bad credentials,
/// schema violations, unmatched routes) travel as result values and never
/// take this path.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Route definition could not be compiled
    #[error("Invalid route pattern '{pattern}': {reason}")]
    Route {
        /// Offending pattern
        pattern: String,
        /// Why compilation failed
        reason: String,
    },

    /// Schema document is malformed
    #[error("Schema error: {0}")]
    Schema(String),

    /// Credential validator failed unexpectedly
    #[error("Validator error: {0}")]
    Validator(String),

    /// A tool did not finish inside its step timeout
    #[error("Tool '{tool}' timed out after {timeout_ms}ms")]
    ToolTimeout {
        /// Tool identifier
        tool: String,
        /// Step timeout that elapsed
        timeout_ms: u64,
    },

    /// A tool invocation failed
    #[error("Tool '{tool}' failed: {message}")]
    Tool {
        /// Tool identifier
        tool: String,
        /// Failure description
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map to the client-facing error code
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ToolTimeout { .. } => ErrorCode::ToolTimeout,
            Self::Tool { .. } => ErrorCode::ToolFailed,
            _ => ErrorCode::InternalError,
        }
    }

    /// Message safe to show a client. Internal detail is withheld.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::ToolTimeout { .. } => self.to_string(),
            Self::Tool { tool, .. } => format!("Tool '{tool}' failed"),
            _ => "An internal error occurred".to_string(),
        }
    }
}

/// Stable error codes carried in the response envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No API key header present
    MissingApiKey,
    /// API key rejected by the validator
    InvalidApiKey,
    /// No bearer token present
    MissingOauthToken,
    /// Bearer token rejected by the validator
    InvalidOauthToken,
    /// Route requires an auth type the resolver does not know
    UnknownAuthType,
    /// Request failed schema validation
    ValidationError,
    /// No route matched the request
    RouteNotFound,
    /// Request exceeded the blanket timeout
    Timeout,
    /// An execution step exceeded its timeout
    ToolTimeout,
    /// An execution step failed
    ToolFailed,
    /// Route matched but nothing handles the intent
    HandlerNotFound,
    /// Client exceeded its rate limit tier
    RateLimited,
    /// Unexpected failure
    InternalError,
}

impl ErrorCode {
    /// Wire representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingApiKey => "MISSING_API_KEY",
            Self::InvalidApiKey => "INVALID_API_KEY",
            Self::MissingOauthToken => "MISSING_OAUTH_TOKEN",
            Self::InvalidOauthToken => "INVALID_OAUTH_TOKEN",
            Self::UnknownAuthType => "UNKNOWN_AUTH_TYPE",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::RouteNotFound => "ROUTE_NOT_FOUND",
            Self::Timeout => "TIMEOUT",
            Self::ToolTimeout => "TOOL_TIMEOUT",
            Self::ToolFailed => "TOOL_FAILED",
            Self::HandlerNotFound => "HANDLER_NOT_FOUND",
            Self::RateLimited => "RATE_LIMITED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// HTTP status used when this code terminates a request
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::MissingApiKey
            | Self::InvalidApiKey
            | Self::MissingOauthToken
            | Self::InvalidOauthToken => StatusCode::UNAUTHORIZED,
            Self::ValidationError => StatusCode::BAD_REQUEST,
            Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::Timeout | Self::ToolTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::ToolFailed => StatusCode::BAD_GATEWAY,
            Self::HandlerNotFound => StatusCode::NOT_IMPLEMENTED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::UnknownAuthType | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
