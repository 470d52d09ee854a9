//! Input and output validation
//!
//! - [`schema`]: JSON-Schema subset evaluation with field-level violations
//! - [`sanitize`]: HTML-entity escaping and truncation of string leaves
//! - [`input`]: body, query and path-parameter validation
//! - [`output`]: the uniform response envelope

pub mod input;
pub mod output;
pub mod sanitize;
pub mod schema;

use serde::{Deserialize, Serialize};

pub use input::{InputValidator, InputValidatorConfig, ValidateOptions};
pub use output::{ErrorBody, Meta, OutputValidator, OutputValidatorConfig, ResponseEnvelope};

/// A single schema violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    /// Dotted path to the offending value (`author.email`, `tags.2`)
    pub field: String,
    /// What is wrong
    pub message: String,
    /// Machine-readable violation kind (`required`, `invalid_type`, ...)
    pub code: String,
    /// What the schema wanted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// What was supplied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,
}

impl ValidationError {
    /// Violation without expected/received detail
    #[must_use]
    pub fn new(field: impl Into<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: code.to_string(),
            expected: None,
            received: None,
        }
    }

    /// Attach expected/received detail
    #[must_use]
    pub fn detail(mut self, expected: impl Into<String>, received: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self.received = Some(received.into());
        self
    }

    fn display_field(&self) -> &str {
        if self.field.is_empty() { "root" } else { &self.field }
    }
}

/// Outcome of validating untrusted input
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationResult<T> {
    /// Input is valid; `data` is the coerced (and possibly sanitized) value
    Success {
        /// Validated data
        data: T,
    },
    /// Input is invalid
    Failure {
        /// Human-readable summary
        message: String,
        /// Every violation found; empty for failures without field detail
        errors: Vec<ValidationError>,
    },
}

impl<T> ValidationResult<T> {
    /// Failure built from violations, summarized
    #[must_use]
    pub fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self::Failure {
            message: summarize(&errors),
            errors,
        }
    }

    /// Whether validation passed
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Validated data, if any
    #[must_use]
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Success { data } => Some(data),
            Self::Failure { .. } => None,
        }
    }

    /// Violations; empty on success
    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        match self {
            Self::Success { .. } => &[],
            Self::Failure { errors, .. } => errors,
        }
    }

    /// Failure summary
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { message, .. } => Some(message),
        }
    }

    /// Convert into a `Result`, keeping the failure parts
    ///
    /// # Errors
    ///
    /// Returns `(message, errors)` when validation failed.
    pub fn into_result(self) -> std::result::Result<T, (String, Vec<ValidationError>)> {
        match self {
            Self::Success { data } => Ok(data),
            Self::Failure { message, errors } => Err((message, errors)),
        }
    }
}

/// One-line summary of violations.
///
/// One violation reads `field: message`; several read
/// `N validation errors: a, b, c...` listing at most three fields.
#[must_use]
pub fn summarize(errors: &[ValidationError]) -> String {
    match errors {
        [] => "Validation failed".to_string(),
        [single] => format!("{}: {}", single.display_field(), single.message),
        many => {
            let fields: Vec<&str> = many.iter().take(3).map(ValidationError::display_field).collect();
            let ellipsis = if many.len() > 3 { "..." } else { "" };
            format!("{} validation errors: {}{ellipsis}", many.len(), fields.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn err(field: &str) -> ValidationError {
        ValidationError::new(field, "required", "Required")
    }

    #[test]
    fn summary_single() {
        assert_eq!(summarize(&[err("topic")]), "topic: Required");
        assert_eq!(summarize(&[err("")]), "root: Required");
    }

    #[test]
    fn summary_lists_three_fields_then_ellipsis() {
        let errors = vec![err("f1"), err("f2"), err("f3"), err("f4")];
        assert_eq!(summarize(&errors), "4 validation errors: f1, f2, f3...");
    }

    #[test]
    fn summary_without_ellipsis_up_to_three() {
        assert_eq!(summarize(&[err("a"), err("b")]), "2 validation errors: a, b");
        assert_eq!(summarize(&[err("a"), err("b"), err("c")]), "3 validation errors: a, b, c");
    }

    #[test]
    fn result_serializes_tagged() {
        let ok: ValidationResult<u32> = ValidationResult::Success { data: 7 };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["data"], 7);

        let bad: ValidationResult<u32> = ValidationResult::from_errors(vec![err("topic")]);
        assert!(!bad.is_success());
        assert_eq!(bad.message(), Some("topic: Required"));
        assert_eq!(bad.errors().len(), 1);
    }
}
