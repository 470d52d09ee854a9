//! JSON Schema subset evaluator.
//!
//! Supported keywords: `type`, `properties`, `required`,
//! `additionalProperties: false`, `items`, `enum`, `minLength`, `maxLength`,
//! `minimum`, `maximum`. Values are checked in this order:
//!
//! 1. **Required keys** must be present and non-null.
//! 2. **Unknown keys** are rejected when `additionalProperties` is `false`,
//!    otherwise passed through untouched.
//! 3. **Type with coercion**: `"123"` becomes `123` for `integer`/`number`,
//!    `"true"`/`"false"` become booleans.
//! 4. **Enum** membership, after coercion.
//! 5. **Length and range** constraints.
//!
//! Nested objects and arrays are descended into; violations carry dotted
//! paths (`author.email`, `tags.1`). A schema that is itself malformed is an
//! `Error::Schema`, never a violation.

use serde_json::{Map, Value};

use super::ValidationError;
use crate::{Error, Result};

/// Violations found and the coerced value
#[derive(Debug, Clone)]
pub struct SchemaOutcome {
    /// Every violation; empty means valid
    pub violations: Vec<ValidationError>,
    /// Input after safe coercions
    pub coerced: Value,
}

impl SchemaOutcome {
    /// Whether the input satisfied the schema
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Validate `value` against `schema`.
///
/// `Value::Null` or `{}` as schema accepts anything.
///
/// # Errors
///
/// Returns `Error::Schema` if the schema uses a keyword with the wrong shape.
pub fn validate(value: &Value, schema: &Value) -> Result<SchemaOutcome> {
    let mut violations = Vec::new();
    let coerced = if is_empty_schema(schema) {
        value.clone()
    } else {
        check(value, schema, "", &mut violations)?
    };
    Ok(SchemaOutcome { violations, coerced })
}

fn is_empty_schema(schema: &Value) -> bool {
    match schema {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        _ => false,
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() { key.to_string() } else { format!("{path}.{key}") }
}

fn check(value: &Value, schema: &Value, path: &str, out: &mut Vec<ValidationError>) -> Result<Value> {
    let Some(schema) = schema.as_object() else {
        return Err(Error::Schema(format!("schema at '{}' must be an object", display(path))));
    };

    let declared = match schema.get("type") {
        None => None,
        Some(Value::String(t)) => Some(t.as_str()),
        Some(other) => {
            return Err(Error::Schema(format!(
                "'type' at '{}' must be a string, got {}",
                display(path),
                json_type_name(other)
            )));
        }
    };

    // Object keywords imply an object even without `type`
    let expects_object = declared == Some("object") || (declared.is_none() && schema.contains_key("properties"));

    let coerced = match declared {
        Some(ty) => match coerce(value, ty) {
            Ok(v) => v,
            Err(message) => {
                out.push(
                    ValidationError::new(path, "invalid_type", message).detail(ty, json_type_name(value)),
                );
                return Ok(value.clone());
            }
        },
        None => value.clone(),
    };

    if let Some(options) = keyword_array(schema, "enum", path)? {
        if !options.contains(&coerced) {
            let listed: Vec<String> = options.iter().map(value_to_display_string).collect();
            out.push(
                ValidationError::new(path, "invalid_enum", format!("must be one of: {}", listed.join(", ")))
                    .detail(listed.join(" | "), value_to_display_string(&coerced)),
            );
        }
    }

    match &coerced {
        Value::String(s) => check_length(s, schema, path, out)?,
        Value::Number(n) => {
            if let Some(num) = n.as_f64() {
                check_range(num, schema, path, out)?;
            }
        }
        Value::Object(map) if expects_object => return check_object(map, schema, path, out),
        Value::Array(items) => return check_array(items, schema, path, out),
        _ => {}
    }

    Ok(coerced)
}

fn check_object(
    map: &Map<String, Value>,
    schema: &Map<String, Value>,
    path: &str,
    out: &mut Vec<ValidationError>,
) -> Result<Value> {
    let properties = match schema.get("properties") {
        None => None,
        Some(Value::Object(p)) => Some(p),
        Some(_) => {
            return Err(Error::Schema(format!("'properties' at '{}' must be an object", display(path))));
        }
    };
    let required = keyword_array(schema, "required", path)?.unwrap_or(&[]);
    let closed = matches!(schema.get("additionalProperties"), Some(Value::Bool(false)));

    for name in required {
        let Some(name) = name.as_str() else {
            return Err(Error::Schema(format!("'required' at '{}' must list strings", display(path))));
        };
        match map.get(name) {
            None => out.push(ValidationError::new(join(path, name), "required", "Required").detail("value", "undefined")),
            Some(Value::Null) => out.push(
                ValidationError::new(join(path, name), "required", "must not be null").detail("value", "null"),
            ),
            Some(_) => {}
        }
    }

    let mut coerced = Map::new();
    for (key, raw) in map {
        let child = join(path, key);
        match properties.and_then(|p| p.get(key)) {
            Some(_) if raw.is_null() => {
                coerced.insert(key.clone(), Value::Null);
            }
            Some(prop_schema) => {
                let value = check(raw, prop_schema, &child, out)?;
                coerced.insert(key.clone(), value);
            }
            None if closed => {
                let known: Vec<&str> = properties.map(|p| p.keys().map(String::as_str).collect()).unwrap_or_default();
                out.push(ValidationError::new(
                    child,
                    "unrecognized_key",
                    format!("unknown field, valid fields are: {}", known.join(", ")),
                ));
            }
            None => {
                coerced.insert(key.clone(), raw.clone());
            }
        }
    }

    Ok(Value::Object(coerced))
}

fn check_array(items: &[Value], schema: &Map<String, Value>, path: &str, out: &mut Vec<ValidationError>) -> Result<Value> {
    let len = items.len() as u64;
    if let Some(min) = keyword_u64(schema, "minItems", path)? {
        if len < min {
            out.push(ValidationError::new(path, "too_small", format!("must contain at least {min} items")));
        }
    }
    if let Some(max) = keyword_u64(schema, "maxItems", path)? {
        if len > max {
            out.push(ValidationError::new(path, "too_big", format!("must contain at most {max} items")));
        }
    }

    let Some(item_schema) = schema.get("items") else {
        return Ok(Value::Array(items.to_vec()));
    };
    let coerced = items
        .iter()
        .enumerate()
        .map(|(i, item)| check(item, item_schema, &join(path, &i.to_string()), out))
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::Array(coerced))
}

fn check_length(s: &str, schema: &Map<String, Value>, path: &str, out: &mut Vec<ValidationError>) -> Result<()> {
    let len = s.chars().count() as u64;
    if let Some(min) = keyword_u64(schema, "minLength", path)? {
        if len < min {
            out.push(
                ValidationError::new(path, "too_small", format!("must be at least {min} characters long"))
                    .detail(format!(">= {min}"), len.to_string()),
            );
        }
    }
    if let Some(max) = keyword_u64(schema, "maxLength", path)? {
        if len > max {
            out.push(
                ValidationError::new(path, "too_big", format!("must be at most {max} characters long"))
                    .detail(format!("<= {max}"), len.to_string()),
            );
        }
    }
    Ok(())
}

fn check_range(num: f64, schema: &Map<String, Value>, path: &str, out: &mut Vec<ValidationError>) -> Result<()> {
    if let Some(min) = keyword_f64(schema, "minimum", path)? {
        if num < min {
            out.push(
                ValidationError::new(path, "too_small", format!("must be >= {min}"))
                    .detail(format!(">= {min}"), num.to_string()),
            );
        }
    }
    if let Some(max) = keyword_f64(schema, "maximum", path)? {
        if num > max {
            out.push(
                ValidationError::new(path, "too_big", format!("must be <= {max}"))
                    .detail(format!("<= {max}"), num.to_string()),
            );
        }
    }
    Ok(())
}

// ── Keyword accessors ─────────────────────────────────────────────────────────

fn keyword_array<'a>(schema: &'a Map<String, Value>, key: &str, path: &str) -> Result<Option<&'a [Value]>> {
    match schema.get(key) {
        None => Ok(None),
        Some(Value::Array(a)) => Ok(Some(a.as_slice())),
        Some(_) => Err(Error::Schema(format!("'{key}' at '{}' must be an array", display(path)))),
    }
}

fn keyword_u64(schema: &Map<String, Value>, key: &str, path: &str) -> Result<Option<u64>> {
    match schema.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| Error::Schema(format!("'{key}' at '{}' must be a non-negative integer", display(path)))),
    }
}

fn keyword_f64(schema: &Map<String, Value>, key: &str, path: &str) -> Result<Option<f64>> {
    match schema.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| Error::Schema(format!("'{key}' at '{}' must be a number", display(path)))),
    }
}

// ── Type coercion ─────────────────────────────────────────────────────────────

fn coerce(value: &Value, declared_type: &str) -> std::result::Result<Value, String> {
    match (declared_type, value) {
        ("string", Value::String(_))
        | ("number", Value::Number(_))
        | ("boolean", Value::Bool(_))
        | ("array", Value::Array(_))
        | ("object", Value::Object(_)) => Ok(value.clone()),
        ("integer", Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        ("integer", Value::Number(n)) => match n.as_f64() {
            // `as` saturates, so out-of-range floats must be refused first
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            Some(f) if !f.is_finite() || f < i64::MIN as f64 || f >= i64::MAX as f64 => {
                Err(format!("Expected integer, received out-of-range number {n}"))
            }
            #[allow(clippy::cast_possible_truncation)]
            Some(f) if f.fract() == 0.0 => Ok(Value::Number((f as i64).into())),
            _ => Err(format!("Expected integer, received float {n}")),
        },
        ("integer", Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(|i| Value::Number(i.into()))
            .map_err(|_| format!("Expected integer, received string \"{s}\"")),
        ("number", Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
            .ok_or_else(|| format!("Expected number, received string \"{s}\"")),
        ("boolean", Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(format!("Expected boolean, received string \"{s}\"")),
        },
        ("string" | "integer" | "number" | "boolean" | "array" | "object", other) => {
            Err(format!("Expected {declared_type}, received {}", json_type_name(other)))
        }
        // Unknown type keyword: pass through
        _ => Ok(value.clone()),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn display(path: &str) -> &str {
    if path.is_empty() { "root" } else { path }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn value_to_display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
