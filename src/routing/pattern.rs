//! Path pattern compilation

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::Serialize;

use crate::{Error, Result};

/// Name given to an unnamed capture and to the value of single-parameter
/// patterns.
const DEFAULT_PARAM: &str = "id";

/// Compiled path matcher.
///
/// Two source forms are accepted:
/// - segment patterns such as `/api/newsletters/:id`, where each `:name`
///   segment captures one path segment into `params[name]`;
/// - raw regular expressions starting with `^`, where named groups capture by
///   name and the first unnamed group captures into `params.id`. Any further
///   unnamed groups are not extracted.
///
/// A pattern with exactly one parameter also exposes that value as `id`.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
    /// `(capture group index, parameter name)`
    params: Vec<(usize, String)>,
    multi_param: bool,
}

impl PathPattern {
    /// Compile a pattern
    ///
    /// # Errors
    ///
    /// Returns `Error::Route` if the pattern is empty, not rooted at `/`,
    /// repeats a parameter name, or is an invalid regex.
    pub fn compile(pattern: &str) -> Result<Self> {
        if pattern.starts_with('^') {
            Self::compile_regex(pattern)
        } else {
            Self::compile_segments(pattern)
        }
    }

    fn compile_segments(pattern: &str) -> Result<Self> {
        if !pattern.starts_with('/') {
            return Err(route_error(pattern, "pattern must start with '/'"));
        }

        let mut expr = String::from("^");
        let mut names: Vec<String> = Vec::new();
        for segment in pattern.trim_end_matches('/').split('/').skip(1) {
            expr.push('/');
            if let Some(name) = segment.strip_prefix(':') {
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(route_error(pattern, format!("invalid parameter name ':{name}'")));
                }
                if names.iter().any(|n| n == name) {
                    return Err(route_error(pattern, format!("duplicate parameter ':{name}'")));
                }
                names.push(name.to_string());
                expr.push_str("([^/]+)");
            } else {
                expr.push_str(&regex::escape(segment));
            }
        }
        expr.push_str("/?$");

        let regex = Regex::new(&expr).map_err(|e| route_error(pattern, e.to_string()))?;
        let params: Vec<(usize, String)> = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| (i + 1, name))
            .collect();

        Ok(Self {
            source: pattern.to_string(),
            regex,
            multi_param: params.len() > 1,
            params,
        })
    }

    fn compile_regex(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| route_error(pattern, e.to_string()))?;

        let mut params = Vec::new();
        let mut unnamed_taken = false;
        for (index, name) in regex.capture_names().enumerate().skip(1) {
            match name {
                Some(name) => params.push((index, name.to_string())),
                None if !unnamed_taken => {
                    unnamed_taken = true;
                    params.push((index, DEFAULT_PARAM.to_string()));
                }
                None => {}
            }
        }

        Ok(Self {
            source: pattern.to_string(),
            regex,
            multi_param: params.len() > 1,
            params,
        })
    }

    /// Match a request path, returning extracted parameters on success
    #[must_use]
    pub fn captures(&self, path: &str) -> Option<RouteParams> {
        let caps = self.regex.captures(path)?;
        let mut values = BTreeMap::new();
        for (index, name) in &self.params {
            if let Some(m) = caps.get(*index) {
                values.insert(name.clone(), m.as_str().to_string());
            }
        }
        if self.params.len() == 1 && !values.contains_key(DEFAULT_PARAM) {
            if let Some(value) = values.values().next().cloned() {
                values.insert(DEFAULT_PARAM.to_string(), value);
            }
        }
        Some(RouteParams(values))
    }

    /// Source text the pattern was compiled from
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Parameter names in capture order
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(_, name)| name.as_str())
    }

    /// Whether the pattern extracts more than one parameter
    #[must_use]
    pub fn is_multi_param(&self) -> bool {
        self.multi_param
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn route_error(pattern: &str, reason: impl Into<String>) -> Error {
    Error::Route {
        pattern: pattern.to_string(),
        reason: reason.into(),
    }
}

/// Path parameters extracted by a match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RouteParams(BTreeMap<String, String>);

impl RouteParams {
    /// Look up a parameter by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// The `id` parameter
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.get(DEFAULT_PARAM)
    }

    /// Number of extracted values
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing was extracted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parameters as a JSON object of strings
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        )
    }
}
