//! Input validation: schema check, then sanitization, then typed extraction

use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, warn};

use super::sanitize::{self, DEFAULT_MAX_LENGTH};
use super::{ValidationResult, schema};
use crate::config::ValidationConfig;

/// Input validator settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputValidatorConfig {
    /// Sanitized strings are truncated to this many characters
    pub max_string_length: usize,
}

impl Default for InputValidatorConfig {
    fn default() -> Self {
        Self {
            max_string_length: DEFAULT_MAX_LENGTH,
        }
    }
}

impl From<&ValidationConfig> for InputValidatorConfig {
    fn from(config: &ValidationConfig) -> Self {
        Self {
            max_string_length: config.max_string_length,
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOptions {
    /// Return coerced data without escaping or truncating strings
    pub skip_sanitization: bool,
}

/// Validates request bodies, query strings and path parameters
#[derive(Debug, Default)]
pub struct InputValidator {
    config: RwLock<Arc<InputValidatorConfig>>,
}

impl InputValidator {
    /// Create a validator
    #[must_use]
    pub fn new(config: InputValidatorConfig) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
        }
    }

    /// Current settings
    #[must_use]
    pub fn config(&self) -> Arc<InputValidatorConfig> {
        Arc::clone(&self.config.read())
    }

    /// Swap in new settings
    pub fn configure(&self, config: InputValidatorConfig) {
        *self.config.write() = Arc::new(config);
    }

    /// Restore defaults
    pub fn reset(&self) {
        self.configure(InputValidatorConfig::default());
    }

    /// Validate `raw` against `schema` and deserialize into `T`.
    ///
    /// Never returns an error: schema violations become a summarized
    /// `Failure`, anything unexpected (a malformed schema, a `T` that does
    /// not fit the schema) is logged and becomes a generic `Failure`.
    pub fn validate_input<T: DeserializeOwned>(
        &self,
        raw: &Value,
        schema: &Value,
        options: ValidateOptions,
    ) -> ValidationResult<T> {
        let outcome = match schema::validate(raw, schema) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Schema evaluation failed");
                return generic_failure();
            }
        };

        if !outcome.is_valid() {
            let result = ValidationResult::from_errors(outcome.violations);
            if let ValidationResult::Failure { message, errors } = &result {
                warn!(errors = errors.len(), "Input validation failed: {message}");
            }
            return result;
        }

        let data = if options.skip_sanitization {
            outcome.coerced
        } else {
            sanitize::sanitize_value(outcome.coerced, self.config().max_string_length)
        };

        match serde_json::from_value(data) {
            Ok(data) => ValidationResult::Success { data },
            Err(e) => {
                error!(error = %e, "Validated input did not deserialize into the target type");
                generic_failure()
            }
        }
    }

    /// Validate query parameters. Never sanitized: they are not rendered.
    pub fn validate_query<T: DeserializeOwned>(&self, raw: &Value, schema: &Value) -> ValidationResult<T> {
        self.validate_input(raw, schema, ValidateOptions { skip_sanitization: true })
    }

    /// Validate path parameters. Never sanitized.
    pub fn validate_params<T: DeserializeOwned>(&self, raw: &Value, schema: &Value) -> ValidationResult<T> {
        self.validate_input(raw, schema, ValidateOptions { skip_sanitization: true })
    }
}

fn generic_failure<T>() -> ValidationResult<T> {
    ValidationResult::Failure {
        message: "Validation failed".to_string(),
        errors: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct GenerateRequest {
        topic: String,
        sections: Option<u32>,
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["topic"],
            "properties": {
                "topic": {"type": "string", "minLength": 3},
                "sections": {"type": "integer", "minimum": 1}
            }
        })
    }

    #[test]
    fn body_is_sanitized_and_typed() {
        let v = InputValidator::default();
        let result: ValidationResult<GenerateRequest> =
            v.validate_input(&json!({"topic": "<b>Rust</b>", "sections": "2"}), &schema(), ValidateOptions::default());
        assert_eq!(
            result.data(),
            Some(&GenerateRequest {
                topic: "&lt;b&gt;Rust&lt;/b&gt;".to_string(),
                sections: Some(2),
            })
        );
    }

    #[test]
    fn query_is_not_sanitized() {
        let v = InputValidator::default();
        let result: ValidationResult<Value> = v.validate_query(&json!({"topic": "a&b<c"}), &schema());
        assert_eq!(result.data().unwrap()["topic"], "a&b<c");

        let params: ValidationResult<Value> = v.validate_params(&json!({"id": "x<y"}), &json!({}));
        assert_eq!(params.data().unwrap()["id"], "x<y");
    }

    #[test]
    fn four_errors_summarized() {
        let schema = json!({
            "type": "object",
            "required": ["f1", "f2", "f3", "f4"],
            "properties": {
                "f1": {"type": "string"}, "f2": {"type": "string"},
                "f3": {"type": "string"}, "f4": {"type": "string"}
            }
        });
        let result: ValidationResult<Value> =
            InputValidator::default().validate_input(&json!({}), &schema, ValidateOptions::default());
        assert_eq!(result.message(), Some("4 validation errors: f1, f2, f3..."));
        assert_eq!(result.errors().len(), 4);
    }

    #[test]
    fn unexpected_failures_are_generic() {
        let v = InputValidator::default();

        // Malformed schema
        let result: ValidationResult<Value> =
            v.validate_input(&json!({}), &json!({"type": 42}), ValidateOptions::default());
        assert_eq!(result.message(), Some("Validation failed"));
        assert!(result.errors().is_empty());

        // Target type stricter than the schema
        let result: ValidationResult<GenerateRequest> =
            v.validate_input(&json!({"other": 1}), &json!({}), ValidateOptions::default());
        assert_eq!(result.message(), Some("Validation failed"));
    }

    #[test]
    fn configure_and_reset_max_length() {
        let v = InputValidator::default();
        v.configure(InputValidatorConfig { max_string_length: 4 });
        let result: ValidationResult<Value> =
            v.validate_input(&json!({"topic": "abcdefgh"}), &json!({}), ValidateOptions::default());
        assert_eq!(result.data().unwrap()["topic"], "abcd");

        v.reset();
        assert_eq!(v.config().max_string_length, DEFAULT_MAX_LENGTH);
    }
}
