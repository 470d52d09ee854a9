//! Auth resolution with audit side effects

use std::sync::Arc;

use axum::http::HeaderMap;
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, error, warn};

use super::cache::{CachingKeyValidator, CachingTokenValidator};
use super::validator::{
    ApiKeyValidator, CredentialCheck, StaticKeyValidator, StaticTokenValidator, StructuralKeyValidator,
    StructuralTokenValidator, TokenValidator,
};
use super::{AuthResult, AuthType};
use crate::audit::{self, AuditEntry, AuditSink};
use crate::config::AuthConfig;
use crate::context::RequestContext;
use crate::error::ErrorCode;

/// Default API key header
pub const DEFAULT_API_KEY_HEADER: &str = "x-api-key";

/// Immutable resolver configuration. Reconfiguring swaps in a new snapshot;
/// a request in flight keeps the snapshot it started with.
#[derive(Debug, Clone)]
pub struct AuthResolverConfig {
    /// Header carrying the API key (lower-case)
    pub api_key_header: String,
    /// Service name passed to the API key validator
    pub service: String,
    /// API key validator
    pub api_key_validator: Arc<dyn ApiKeyValidator>,
    /// Bearer token validator
    pub token_validator: Arc<dyn TokenValidator>,
}

impl Default for AuthResolverConfig {
    fn default() -> Self {
        Self {
            api_key_header: DEFAULT_API_KEY_HEADER.to_string(),
            service: "newsletter".to_string(),
            api_key_validator: Arc::new(StructuralKeyValidator::default()),
            token_validator: Arc::new(StructuralTokenValidator::default()),
        }
    }
}

impl AuthResolverConfig {
    /// Build from configuration. Configured keys and tokens get
    /// constant-time validators; without them the structural stubs are used.
    /// Either way validators are wrapped in the credential cache.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        let api_key_validator: Arc<dyn ApiKeyValidator> = if config.api_keys.is_empty() {
            warn!("No API keys configured - using structural API key check only");
            Arc::new(StructuralKeyValidator::new(config.min_api_key_length))
        } else {
            Arc::new(StaticKeyValidator::from_config(&config.api_keys))
        };
        let token_validator: Arc<dyn TokenValidator> = if config.bearer_tokens.is_empty() {
            warn!("No bearer tokens configured - using structural token check only");
            Arc::new(StructuralTokenValidator::new(config.min_token_length))
        } else {
            Arc::new(StaticTokenValidator::from_config(&config.bearer_tokens))
        };

        Self {
            api_key_header: config.api_key_header.to_ascii_lowercase(),
            service: config.service.clone(),
            api_key_validator: Arc::new(CachingKeyValidator::new(api_key_validator, config.credential_cache_ttl)),
            token_validator: Arc::new(CachingTokenValidator::new(token_validator, config.credential_cache_ttl)),
        }
    }

    /// Replace the API key validator
    #[must_use]
    pub fn with_api_key_validator(mut self, validator: Arc<dyn ApiKeyValidator>) -> Self {
        self.api_key_validator = validator;
        self
    }

    /// Replace the token validator
    #[must_use]
    pub fn with_token_validator(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.token_validator = validator;
        self
    }

    /// Replace the API key header
    #[must_use]
    pub fn with_api_key_header(mut self, header: &str) -> Self {
        self.api_key_header = header.to_ascii_lowercase();
        self
    }
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct AuthOptions {
    /// Correlation id written into audit entries
    pub correlation_id: String,
    /// Client address written into audit entries
    pub ip_address: Option<String>,
    /// Overrides the configured service name
    pub service: Option<String>,
    /// What is being accessed (`newsletter.generate`), for the audit trail
    pub resource_id: Option<String>,
}

impl AuthOptions {
    /// Options carrying only a correlation id
    #[must_use]
    pub fn with_correlation_id(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            ..Self::default()
        }
    }

    /// Options derived from a request context
    #[must_use]
    pub fn from_context(ctx: &RequestContext) -> Self {
        Self {
            correlation_id: ctx.correlation_id.clone(),
            ip_address: ctx.request.ip.clone(),
            service: None,
            resource_id: None,
        }
    }

    /// Set the accessed resource
    #[must_use]
    pub fn resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }
}

/// Resolves request credentials against injectable validators and records an
/// audit entry for every credential outcome
pub struct AuthResolver {
    config: RwLock<Arc<AuthResolverConfig>>,
    audit: Arc<dyn AuditSink>,
}

impl AuthResolver {
    /// Create a resolver
    #[must_use]
    pub fn new(config: AuthResolverConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            audit,
        }
    }

    /// Current configuration snapshot
    #[must_use]
    pub fn config(&self) -> Arc<AuthResolverConfig> {
        Arc::clone(&self.config.read())
    }

    /// Swap in a new configuration
    pub fn configure(&self, config: AuthResolverConfig) {
        *self.config.write() = Arc::new(config);
    }

    /// Restore factory defaults (structural validators, `x-api-key`)
    pub fn reset(&self) {
        self.configure(AuthResolverConfig::default());
    }

    /// Resolve credentials for an auth type given by name. Unknown names
    /// yield `UNKNOWN_AUTH_TYPE` without an audit entry.
    pub async fn resolve_named(&self, headers: &HeaderMap, required: &str, options: &AuthOptions) -> AuthResult {
        match required.parse::<AuthType>() {
            Ok(auth_type) => self.resolve(headers, auth_type, options).await,
            Err(_) => {
                warn!(correlation_id = %options.correlation_id, required, "Unknown auth type");
                AuthResult::failure(
                    None,
                    ErrorCode::UnknownAuthType,
                    format!("Unknown auth type: {required}"),
                )
            }
        }
    }

    /// Resolve credentials for `required`
    pub async fn resolve(&self, headers: &HeaderMap, required: AuthType, options: &AuthOptions) -> AuthResult {
        let config = self.config();
        match required {
            AuthType::None => AuthResult::anonymous(),
            AuthType::ApiKey => self.resolve_api_key(&config, headers, options).await,
            AuthType::Oauth => self.resolve_oauth(&config, headers, options).await,
        }
    }

    async fn resolve_api_key(
        &self,
        config: &AuthResolverConfig,
        headers: &HeaderMap,
        options: &AuthOptions,
    ) -> AuthResult {
        let Some(key) = extract_api_key(headers, &config.api_key_header) else {
            warn!(correlation_id = %options.correlation_id, header = %config.api_key_header, "Missing API key");
            return self
                .fail(AuthType::ApiKey, ErrorCode::MissingApiKey, "Missing API key", options)
                .await;
        };

        let service = options.service.as_deref().unwrap_or(&config.service);
        let check = match config.api_key_validator.validate(key, service).await {
            Ok(check) => check,
            Err(e) => {
                error!(correlation_id = %options.correlation_id, error = %e, "API key validator failed");
                CredentialCheck::rejected("API key validation unavailable")
            }
        };

        if !check.valid {
            let reason = check.reason.unwrap_or_else(|| "Invalid API key".to_string());
            warn!(correlation_id = %options.correlation_id, reason = %reason, "Invalid API key");
            return self
                .fail(AuthType::ApiKey, ErrorCode::InvalidApiKey, &reason, options)
                .await;
        }

        let result = success(AuthType::ApiKey, check, Some(service));
        self.record_success(audit::API_KEY_VALIDATE, &result, options).await;
        debug!(correlation_id = %options.correlation_id, service, "API key accepted");
        result
    }

    async fn resolve_oauth(
        &self,
        config: &AuthResolverConfig,
        headers: &HeaderMap,
        options: &AuthOptions,
    ) -> AuthResult {
        let Some(token) = extract_bearer_token(headers) else {
            warn!(correlation_id = %options.correlation_id, "Missing OAuth token");
            return self
                .fail(AuthType::Oauth, ErrorCode::MissingOauthToken, "Missing OAuth token", options)
                .await;
        };

        let check = match config.token_validator.validate(token).await {
            Ok(check) => check,
            Err(e) => {
                error!(correlation_id = %options.correlation_id, error = %e, "Token validator failed");
                CredentialCheck::rejected("OAuth token validation unavailable")
            }
        };

        if !check.valid {
            let reason = check.reason.unwrap_or_else(|| "Invalid OAuth token".to_string());
            warn!(correlation_id = %options.correlation_id, reason = %reason, "Invalid OAuth token");
            return self
                .fail(AuthType::Oauth, ErrorCode::InvalidOauthToken, &reason, options)
                .await;
        }

        let result = success(AuthType::Oauth, check, None);
        self.record_success(audit::AUTH_SUCCESS, &result, options).await;
        debug!(correlation_id = %options.correlation_id, "OAuth token accepted");
        result
    }

    async fn fail(&self, auth_type: AuthType, code: ErrorCode, reason: &str, options: &AuthOptions) -> AuthResult {
        telemetry_metrics::counter!("auth_failures_total", "code" => code.as_str()).increment(1);
        let entry = base_entry(audit::AUTH_FAILURE, false, options).details(json!({
            "authType": auth_type.as_str(),
            "code": code.as_str(),
            "reason": reason,
        }));
        self.write_audit(entry).await;
        AuthResult::failure(Some(auth_type), code, reason)
    }

    async fn record_success(&self, action: &str, result: &AuthResult, options: &AuthOptions) {
        let entry = base_entry(action, true, options)
            .user(result.user_id.clone(), result.user_email.clone())
            .details(json!({
                "authType": result.auth_type.map(AuthType::as_str),
                "service": result.service,
            }));
        self.write_audit(entry).await;
    }

    async fn write_audit(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.record(entry).await {
            warn!(error = %e, "Failed to write audit entry");
        }
    }
}

fn base_entry(action: &str, success: bool, options: &AuthOptions) -> AuditEntry {
    let mut entry = AuditEntry::new(options.correlation_id.clone(), action, "auth", success)
        .ip_address(options.ip_address.clone());
    if let Some(resource) = &options.resource_id {
        entry = entry.resource_id(resource.clone());
    }
    entry
}

fn success(auth_type: AuthType, check: CredentialCheck, service: Option<&str>) -> AuthResult {
    AuthResult {
        valid: true,
        auth_type: Some(auth_type),
        user_id: check.user_id,
        user_email: check.user_email,
        service: check.service.or_else(|| service.map(String::from)),
        scopes: check.scopes,
        error: None,
    }
}

/// First value of the API key header, trimmed; empty counts as missing
fn extract_api_key<'a>(headers: &'a HeaderMap, header: &str) -> Option<&'a str> {
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Bearer token from `Authorization`, prefix stripped case-insensitively
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?.trim();
    let token = match value.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => &value[7..],
        _ => value,
    };
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
