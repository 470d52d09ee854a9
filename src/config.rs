//! Configuration management

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::routing::RouteDefinition;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Input validation configuration
    pub validation: ValidationConfig,
    /// Response envelope configuration
    pub response: ResponseConfig,
    /// Execution planner timeouts
    pub planner: PlannerConfig,
    /// CORS configuration
    pub cors: CorsConfig,
    /// Requests per minute per rate limit tier
    pub rate_limits: RateLimitConfig,
    /// Audit trail configuration
    pub audit: AuditConfig,
    /// Extra routes appended after the built-in table
    pub routes: Vec<RouteDefinition>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or carries a planner timeout table that breaks AI > external > default.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!("Config file not found: {}", p.display())));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("DISPATCH_GATEWAY_").split("__"));

        let mut config: Self = figment.extract().map_err(|e| Error::Config(e.to_string()))?;

        // Env files first so ${VAR} expansion can see them
        config.load_env_files();
        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    /// Parse a YAML document without touching the environment
    ///
    /// # Errors
    ///
    /// Returns an error if the document is invalid.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let p = &self.planner;
        if !(p.ai_timeout > p.external_timeout && p.external_timeout > p.default_timeout) {
            return Err(Error::Config(format!(
                "planner timeouts must satisfy ai > external > default (got {:?} / {:?} / {:?})",
                p.ai_timeout, p.external_timeout, p.default_timeout
            )));
        }
        if self.validation.max_string_length == 0 {
            return Err(Error::Config("validation.max_string_length must be positive".to_string()));
        }
        if let Some((tier, _)) = self.rate_limits.tiers.iter().find(|(_, rpm)| **rpm == 0) {
            return Err(Error::Config(format!("rate limit tier '{tier}' must allow at least one request")));
        }
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                match dirs::home_dir() {
                    Some(home) => path_str.replacen('~', &home.display().to_string(), 1),
                    None => path_str.clone(),
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} in credential values and the audit path
    fn expand_env_vars(&mut self) {
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        for credential in self.auth.api_keys.iter_mut().chain(self.auth.bearer_tokens.iter_mut()) {
            credential.key = expand_string(&re, &credential.key);
        }
        self.audit.path = expand_string(&re, &self.audit.path);
    }
}

/// Expand environment variables in a string
fn expand_string(re: &Regex, value: &str) -> String {
    re.replace_all(value, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout when a route sets none
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Take the client address from `x-forwarded-for`. Only enable behind a
    /// proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39500,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024, // 10MB
            trust_forwarded_for: false,
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Header carrying the API key
    pub api_key_header: String,
    /// Service name API keys are validated for
    pub service: String,
    /// Minimum API key length accepted by the structural check
    pub min_api_key_length: usize,
    /// Minimum bearer token length accepted by the structural check
    pub min_token_length: usize,
    /// Known API keys. Empty means structural checks only.
    pub api_keys: Vec<CredentialConfig>,
    /// Known bearer tokens. Empty means structural checks only.
    pub bearer_tokens: Vec<CredentialConfig>,
    /// How long an accepted credential stays cached
    #[serde(with = "humantime_serde")]
    pub credential_cache_ttl: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key_header: "x-api-key".to_string(),
            service: "newsletter".to_string(),
            min_api_key_length: 10,
            min_token_length: 6,
            api_keys: Vec::new(),
            bearer_tokens: Vec::new(),
            credential_cache_ttl: Duration::from_secs(300),
        }
    }
}

/// A known API key or bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Secret value. Supports `env:VAR_NAME`, and `auto` for bearer tokens.
    pub key: String,

    /// Human-readable name for this client
    #[serde(default)]
    pub name: String,

    /// User id reported on success (defaults to `name`)
    #[serde(default)]
    pub user_id: Option<String>,

    /// User email reported on success
    #[serde(default)]
    pub user_email: Option<String>,

    /// Granted scopes
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Services this credential is valid for (empty = all)
    #[serde(default)]
    pub services: Vec<String>,
}

impl CredentialConfig {
    /// Resolve the secret (expand `env:VAR`, generate if `auto`)
    #[must_use]
    pub fn resolve_secret(&self) -> String {
        if self.key == "auto" {
            format!("dg_{}", Uuid::new_v4().simple())
        } else if let Some(var_name) = self.key.strip_prefix("env:") {
            env::var(var_name).unwrap_or_else(|_| self.key.clone())
        } else {
            self.key.clone()
        }
    }
}

/// Input validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Sanitized strings are truncated to this many characters
    pub max_string_length: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_string_length: 10_000,
        }
    }
}

/// Response envelope configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// Field names removed from response data at any depth
    pub sensitive_fields: Vec<String>,
    /// Fields starting with this prefix are server-internal and removed
    pub internal_prefix: String,
    /// Attach `meta` (correlation id, duration, timestamp)
    pub include_meta: bool,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            sensitive_fields: [
                "password",
                "token",
                "accessToken",
                "refreshToken",
                "apiKey",
                "secret",
                "clientSecret",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            internal_prefix: "_".to_string(),
            include_meta: true,
        }
    }
}

/// Execution planner timeout table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Timeout for AI generation tools
    #[serde(with = "humantime_serde")]
    pub ai_timeout: Duration,
    /// Timeout for search and third-party API tools
    #[serde(with = "humantime_serde")]
    pub external_timeout: Duration,
    /// Timeout for everything else
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    /// Tool id prefixes classed as AI generation
    pub ai_prefixes: Vec<String>,
    /// Tool id prefixes classed as external API
    pub external_prefixes: Vec<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            ai_timeout: Duration::from_secs(60),
            external_timeout: Duration::from_secs(30),
            default_timeout: Duration::from_secs(10),
            ai_prefixes: ["claude", "gemini", "openai"].into_iter().map(String::from).collect(),
            external_prefixes: ["stability", "google-", "brave", "search"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable the CORS middleware
    pub enabled: bool,
    /// Allowed origins (`*` for any)
    pub allowed_origins: Vec<String>,
    /// Allowed methods
    pub allowed_methods: Vec<String>,
    /// Allowed request headers
    pub allowed_headers: Vec<String>,
    /// Preflight cache lifetime
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .into_iter()
                .map(String::from)
                .collect(),
            allowed_headers: ["content-type", "authorization", "x-api-key", "x-correlation-id"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_age: Duration::from_secs(86_400),
        }
    }
}

/// Rate limiting per tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable the rate limit middleware
    pub enabled: bool,
    /// Requests per minute per client, by tier name
    pub tiers: HashMap<String, u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tiers: HashMap::from([
                ("ai".to_string(), 10),
                ("standard".to_string(), 60),
                ("read".to_string(), 120),
            ]),
        }
    }
}

/// Where audit entries go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkKind {
    /// Structured log line
    #[default]
    Tracing,
    /// JSON lines appended to `path`
    File,
}

/// Audit trail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Sink kind
    pub sink: AuditSinkKind,
    /// JSONL file for the file sink
    pub path: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink: AuditSinkKind::Tracing,
            path: "audit.jsonl".to_string(),
        }
    }
}
