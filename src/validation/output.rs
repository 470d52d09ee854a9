//! Response envelope and output filtering

use std::collections::HashSet;
use std::sync::Arc;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ResponseConfig;
use crate::context::RequestContext;
use crate::error::ErrorCode;

/// Error part of the envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Structured detail (validation errors, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Request metadata attached to every envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    /// Request correlation id
    pub correlation_id: String,
    /// Milliseconds spent in the gateway
    pub duration: u64,
    /// When the response was built
    pub timestamp: DateTime<Utc>,
}

impl Meta {
    /// Metadata for a request finishing now
    #[must_use]
    pub fn from_context(ctx: &RequestContext) -> Self {
        Self {
            correlation_id: ctx.correlation_id.clone(),
            duration: u64::try_from(ctx.elapsed().as_millis()).unwrap_or(u64::MAX),
            timestamp: Utc::now(),
        }
    }
}

/// `{success, data?, error?, meta?}`, returned by every endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Whether the request succeeded
    pub success: bool,
    /// Payload on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// Request metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl ResponseEnvelope {
    /// Successful envelope
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: None,
        }
    }

    /// Failed envelope
    #[must_use]
    pub fn err(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
                details: None,
            }),
            meta: None,
        }
    }

    /// Attach error details
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        if let Some(error) = self.error.as_mut() {
            error.details = Some(details);
        }
        self
    }

    /// Attach metadata
    #[must_use]
    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Error code, if failed
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }

    /// HTTP status for this envelope
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.error_code().map_or(StatusCode::OK, ErrorCode::status)
    }
}

impl IntoResponse for ResponseEnvelope {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

/// Output filtering settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputValidatorConfig {
    /// Field names removed at any depth
    pub sensitive_fields: HashSet<String>,
    /// Fields with this prefix are removed; empty disables
    pub internal_prefix: String,
    /// Attach `meta`
    pub include_meta: bool,
}

impl Default for OutputValidatorConfig {
    fn default() -> Self {
        Self::from(&ResponseConfig::default())
    }
}

impl From<&ResponseConfig> for OutputValidatorConfig {
    fn from(config: &ResponseConfig) -> Self {
        Self {
            sensitive_fields: config.sensitive_fields.iter().cloned().collect(),
            internal_prefix: config.internal_prefix.clone(),
            include_meta: config.include_meta,
        }
    }
}

/// Builds envelopes and strips sensitive fields from outgoing data
#[derive(Debug, Default)]
pub struct OutputValidator {
    config: RwLock<Arc<OutputValidatorConfig>>,
}

impl OutputValidator {
    /// Create a validator
    #[must_use]
    pub fn new(config: OutputValidatorConfig) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
        }
    }

    /// Current settings
    #[must_use]
    pub fn config(&self) -> Arc<OutputValidatorConfig> {
        Arc::clone(&self.config.read())
    }

    /// Swap in new settings
    pub fn configure(&self, config: OutputValidatorConfig) {
        *self.config.write() = Arc::new(config);
    }

    /// Restore defaults
    pub fn reset(&self) {
        self.configure(OutputValidatorConfig::default());
    }

    /// Success envelope with sensitive fields stripped
    #[must_use]
    pub fn success(&self, data: Value, ctx: &RequestContext) -> ResponseEnvelope {
        let config = self.config();
        let envelope = ResponseEnvelope::ok(strip(data, &config));
        attach_meta(envelope, &config, ctx)
    }

    /// Failure envelope
    #[must_use]
    pub fn failure(&self, envelope: ResponseEnvelope, ctx: &RequestContext) -> ResponseEnvelope {
        attach_meta(envelope, &self.config(), ctx)
    }

    /// Attach meta to an envelope built elsewhere, unless it already has one
    #[must_use]
    pub fn finalize(&self, envelope: ResponseEnvelope, ctx: &RequestContext) -> ResponseEnvelope {
        if envelope.meta.is_some() {
            return envelope;
        }
        attach_meta(envelope, &self.config(), ctx)
    }

    /// Remove sensitive and internal fields at any depth
    #[must_use]
    pub fn strip_sensitive(&self, data: Value) -> Value {
        strip(data, &self.config())
    }
}

fn attach_meta(envelope: ResponseEnvelope, config: &OutputValidatorConfig, ctx: &RequestContext) -> ResponseEnvelope {
    if config.include_meta {
        envelope.with_meta(Meta::from_context(ctx))
    } else {
        envelope
    }
}

fn strip(value: Value, config: &OutputValidatorConfig) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| {
                    !config.sensitive_fields.contains(k)
                        && (config.internal_prefix.is_empty() || !k.starts_with(&config.internal_prefix))
                })
                .map(|(k, v)| (k, strip(v, config)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| strip(v, config)).collect()),
        other => other,
    }
}
