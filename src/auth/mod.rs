//! Authentication resolution
//!
//! Supports:
//! - API keys read from a configurable header (default `x-api-key`)
//! - OAuth bearer tokens from the `Authorization` header
//! - Injectable validators with a TTL credential cache
//! - An audit entry for every credential outcome

mod cache;
mod resolver;
mod validator;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use cache::{CachingKeyValidator, CachingTokenValidator, CredentialCache};
pub use resolver::{AuthOptions, AuthResolver, AuthResolverConfig};
pub use validator::{
    ApiKeyValidator, CredentialCheck, StaticKeyValidator, StaticTokenValidator, StructuralKeyValidator,
    StructuralTokenValidator, TokenValidator,
};

use crate::Error;
use crate::error::ErrorCode;

/// Credential a route requires
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// Public
    #[default]
    None,
    /// API key header
    ApiKey,
    /// OAuth bearer token
    Oauth,
}

impl AuthType {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ApiKey => "api_key",
            Self::Oauth => "oauth",
        }
    }

    /// Whether a credential is needed
    #[must_use]
    pub const fn is_required(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl FromStr for AuthType {
    type Err = Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "api_key" => Ok(Self::ApiKey),
            "oauth" => Ok(Self::Oauth),
            other => Err(Error::Config(format!("Unknown auth type: {other}"))),
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why authentication failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthError {
    /// Stable code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
}

/// Outcome of resolving a request's credentials. Produced fresh per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    /// Whether the request may proceed
    pub valid: bool,
    /// Auth type that was resolved; `None` when the requested type was unknown
    #[serde(rename = "type")]
    pub auth_type: Option<AuthType>,
    /// Authenticated user id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Authenticated user email
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    /// Service the credential belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Granted scopes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    /// Failure detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AuthError>,
}

impl AuthResult {
    /// Successful result with no identity attached
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            valid: true,
            auth_type: Some(AuthType::None),
            user_id: None,
            user_email: None,
            service: None,
            scopes: None,
            error: None,
        }
    }

    /// Failed result
    #[must_use]
    pub fn failure(auth_type: Option<AuthType>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            valid: false,
            auth_type,
            user_id: None,
            user_email: None,
            service: None,
            scopes: None,
            error: Some(AuthError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Error code, when invalid
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_type_round_trips_names() {
        for t in [AuthType::None, AuthType::ApiKey, AuthType::Oauth] {
            assert_eq!(t.as_str().parse::<AuthType>().unwrap(), t);
        }
        assert!("basic".parse::<AuthType>().is_err());
        assert!(!AuthType::None.is_required());
        assert!(AuthType::Oauth.is_required());
    }

    #[test]
    fn result_serializes_type_field() {
        let r = AuthResult::failure(Some(AuthType::ApiKey), ErrorCode::MissingApiKey, "Missing API key");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["valid"], false);
        assert_eq!(json["type"], "api_key");
        assert_eq!(json["error"]["code"], "MISSING_API_KEY");
        assert!(json.get("userEmail").is_none());
    }
}
