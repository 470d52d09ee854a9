//! Credential validators

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::config::CredentialConfig;
use crate::Result;

/// What a validator concluded about a credential
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialCheck {
    /// Whether the credential is accepted
    pub valid: bool,
    /// Service the credential belongs to
    pub service: Option<String>,
    /// User id behind the credential
    pub user_id: Option<String>,
    /// User email behind the credential
    pub user_email: Option<String>,
    /// Granted scopes
    pub scopes: Option<Vec<String>>,
    /// Rejection reason
    pub reason: Option<String>,
}

impl CredentialCheck {
    /// Accepted credential for `service` with no identity attached
    #[must_use]
    pub fn accepted(service: impl Into<String>) -> Self {
        Self {
            valid: true,
            service: Some(service.into()),
            ..Self::default()
        }
    }

    /// Rejected credential
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Validates API keys
#[async_trait]
pub trait ApiKeyValidator: Send + Sync + fmt::Debug {
    /// Validate `key` for `service`.
    ///
    /// Rejections are `Ok` with `valid == false`; `Err` is reserved for
    /// failures of the validator itself.
    async fn validate(&self, key: &str, service: &str) -> Result<CredentialCheck>;
}

/// Validates OAuth bearer tokens
#[async_trait]
pub trait TokenValidator: Send + Sync + fmt::Debug {
    /// Validate a token with the `Bearer ` prefix already removed.
    ///
    /// Rejections are `Ok` with `valid == false`; `Err` is reserved for
    /// failures of the validator itself.
    async fn validate(&self, token: &str) -> Result<CredentialCheck>;
}

/// Printable, non-whitespace ASCII of at least `min_length` characters
fn structurally_valid(credential: &str, min_length: usize) -> std::result::Result<(), String> {
    if credential.len() < min_length {
        return Err(format!("Credential shorter than {min_length} characters"));
    }
    if !credential.chars().all(|c| c.is_ascii_graphic()) {
        return Err("Credential contains invalid characters".to_string());
    }
    Ok(())
}

/// Structural API key check only. Accepts any well-formed key; production
/// wiring replaces it with a real validator.
#[derive(Debug, Clone)]
pub struct StructuralKeyValidator {
    min_length: usize,
}

impl StructuralKeyValidator {
    /// Require keys of at least `min_length` characters
    #[must_use]
    pub fn new(min_length: usize) -> Self {
        Self { min_length }
    }
}

impl Default for StructuralKeyValidator {
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait]
impl ApiKeyValidator for StructuralKeyValidator {
    async fn validate(&self, key: &str, service: &str) -> Result<CredentialCheck> {
        Ok(match structurally_valid(key, self.min_length) {
            Ok(()) => CredentialCheck::accepted(service),
            Err(reason) => CredentialCheck::rejected(reason),
        })
    }
}

/// Structural token check only
#[derive(Debug, Clone)]
pub struct StructuralTokenValidator {
    min_length: usize,
}

impl StructuralTokenValidator {
    /// Require tokens of at least `min_length` characters
    #[must_use]
    pub fn new(min_length: usize) -> Self {
        Self { min_length }
    }
}

impl Default for StructuralTokenValidator {
    fn default() -> Self {
        Self::new(6)
    }
}

#[async_trait]
impl TokenValidator for StructuralTokenValidator {
    async fn validate(&self, token: &str) -> Result<CredentialCheck> {
        Ok(match structurally_valid(token, self.min_length) {
            Ok(()) => CredentialCheck::accepted("oauth"),
            Err(reason) => CredentialCheck::rejected(reason),
        })
    }
}

/// Resolved credential with its secret expanded
#[derive(Clone)]
struct KnownCredential {
    secret: String,
    name: String,
    user_id: Option<String>,
    user_email: Option<String>,
    scopes: Vec<String>,
    services: Vec<String>,
}

impl fmt::Debug for KnownCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnownCredential")
            .field("name", &self.name)
            .field("user_email", &self.user_email)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

impl KnownCredential {
    fn from_config(config: &CredentialConfig) -> Self {
        Self {
            secret: config.resolve_secret(),
            name: config.name.clone(),
            user_id: config.user_id.clone(),
            user_email: config.user_email.clone(),
            scopes: config.scopes.clone(),
            services: config.services.clone(),
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        self.secret.as_bytes().ct_eq(candidate.as_bytes()).into()
    }

    fn can_access_service(&self, service: &str) -> bool {
        self.services.is_empty() || self.services.iter().any(|s| s == "*" || s == service)
    }

    fn check(&self, service: &str) -> CredentialCheck {
        CredentialCheck {
            valid: true,
            service: Some(service.to_string()),
            user_id: self.user_id.clone().or_else(|| Some(self.name.clone())),
            user_email: self.user_email.clone(),
            scopes: Some(self.scopes.clone()),
            reason: None,
        }
    }
}

/// API keys listed in configuration, compared in constant time
#[derive(Debug, Clone)]
pub struct StaticKeyValidator {
    keys: Vec<KnownCredential>,
}

impl StaticKeyValidator {
    /// Build from configured keys
    #[must_use]
    pub fn from_config(keys: &[CredentialConfig]) -> Self {
        Self {
            keys: keys.iter().map(KnownCredential::from_config).collect(),
        }
    }
}

#[async_trait]
impl ApiKeyValidator for StaticKeyValidator {
    async fn validate(&self, key: &str, service: &str) -> Result<CredentialCheck> {
        let Some(known) = self.keys.iter().find(|k| k.matches(key)) else {
            return Ok(CredentialCheck::rejected("Unknown API key"));
        };
        if !known.can_access_service(service) {
            return Ok(CredentialCheck::rejected(format!(
                "API key '{}' is not valid for service '{service}'",
                known.name
            )));
        }
        Ok(known.check(service))
    }
}

/// Bearer tokens listed in configuration, compared in constant time
#[derive(Debug, Clone)]
pub struct StaticTokenValidator {
    tokens: Vec<KnownCredential>,
}

impl StaticTokenValidator {
    /// Build from configured tokens
    #[must_use]
    pub fn from_config(configs: &[CredentialConfig]) -> Self {
        let tokens: Vec<KnownCredential> = configs.iter().map(KnownCredential::from_config).collect();
        for (config, known) in configs.iter().zip(&tokens) {
            if config.key == "auto" {
                tracing::info!(name = %known.name, "Generated bearer token");
            }
        }
        Self { tokens }
    }
}

#[async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> Result<CredentialCheck> {
        Ok(match self.tokens.iter().find(|t| t.matches(token)) {
            Some(known) => known.check("oauth"),
            None => CredentialCheck::rejected("Unknown bearer token"),
        })
    }
}
