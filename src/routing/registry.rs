//! Ordered route registry

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::pattern::{PathPattern, RouteParams};
use crate::auth::AuthType;
use crate::intent::ToolId;
use crate::{Error, Result};

/// HTTP methods a route can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
    /// OPTIONS
    Options,
    /// HEAD
    Head,
}

impl HttpMethod {
    /// Canonical upper-case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Head => "HEAD",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "OPTIONS" => Ok(Self::Options),
            "HEAD" => Ok(Self::Head),
            other => Err(Error::Config(format!("Unsupported HTTP method: {other}"))),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative route definition. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDefinition {
    /// HTTP method
    pub method: HttpMethod,
    /// Path pattern (`/api/newsletters/:id` or a `^`-anchored regex)
    pub path: String,
    /// Resource name (`newsletter`)
    pub resource: String,
    /// Action on the resource (`generate`)
    pub action: String,
    /// Optional refinement of the action (`enhanced`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_action: Option<String>,
    /// Grouping used for documentation (`generation`, `storage`, ...)
    #[serde(default)]
    pub category: String,
    /// Authentication the route requires
    #[serde(default)]
    pub auth: AuthType,
    /// Tools invoked to fulfil the intent, in execution order
    #[serde(default)]
    pub tools: Vec<ToolId>,
    /// Rate limit tier name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_tier: Option<String>,
    /// Route-specific request timeout
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl RouteDefinition {
    /// Start a definition with the required fields; everything else defaults
    #[must_use]
    pub fn new(method: HttpMethod, path: &str, resource: &str, action: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
            sub_action: None,
            category: String::new(),
            auth: AuthType::None,
            tools: Vec::new(),
            rate_limit_tier: None,
            timeout: None,
        }
    }

    /// Set the sub-action
    #[must_use]
    pub fn sub_action(mut self, sub_action: &str) -> Self {
        self.sub_action = Some(sub_action.to_string());
        self
    }

    /// Set the category
    #[must_use]
    pub fn category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    /// Set the auth requirement
    #[must_use]
    pub fn auth(mut self, auth: AuthType) -> Self {
        self.auth = auth;
        self
    }

    /// Set the tool list
    #[must_use]
    pub fn tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|t| ToolId::from(*t)).collect();
        self
    }

    /// Set the rate limit tier
    #[must_use]
    pub fn rate_limit_tier(mut self, tier: &str) -> Self {
        self.rate_limit_tier = Some(tier.to_string());
        self
    }

    /// Set a route-specific timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `resource.action[.sub_action]`
    #[must_use]
    pub fn qualified_action(&self) -> String {
        match &self.sub_action {
            Some(sub) => format!("{}.{}.{sub}", self.resource, self.action),
            None => format!("{}.{}", self.resource, self.action),
        }
    }
}

/// A definition together with its compiled matcher
#[derive(Debug)]
pub struct CompiledRoute {
    /// The registered definition
    pub definition: RouteDefinition,
    /// Compiled path pattern
    pub pattern: PathPattern,
}

impl CompiledRoute {
    fn compile(definition: RouteDefinition) -> Result<Self> {
        let pattern = PathPattern::compile(&definition.path)?;
        Ok(Self { definition, pattern })
    }
}

/// Successful match result
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// Matched route
    pub route: Arc<CompiledRoute>,
    /// Extracted path parameters
    pub params: RouteParams,
}

impl RouteMatch {
    /// Matched definition
    #[must_use]
    pub fn definition(&self) -> &RouteDefinition {
        &self.route.definition
    }
}

/// Pattern summary used for documentation
#[derive(Debug, Clone, Serialize)]
pub struct RoutePatternInfo {
    /// HTTP method
    pub method: HttpMethod,
    /// Pattern source
    pub path: String,
    /// `resource.action[.sub_action]`
    pub action: String,
    /// Category
    pub category: String,
    /// Required auth
    pub auth: AuthType,
    /// Tools
    pub tools: Vec<ToolId>,
    /// Whether the pattern extracts more than one parameter
    pub multi_param: bool,
}

/// Ordered, append-only route registry.
///
/// Registration is serialized against concurrent matches by a read-write lock,
/// so routes may be added after startup. Matching is a linear scan in
/// registration order.
#[derive(Debug, Default)]
pub struct RouteRegistry {
    routes: RwLock<Vec<Arc<CompiledRoute>>>,
}

impl RouteRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-loaded with the given definitions
    ///
    /// # Errors
    ///
    /// Returns an error if any pattern fails to compile.
    pub fn with_routes(definitions: impl IntoIterator<Item = RouteDefinition>) -> Result<Self> {
        let registry = Self::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    /// Append a definition. Earlier registrations keep precedence, including
    /// over a later definition with the same method and path.
    ///
    /// # Errors
    ///
    /// Returns `Error::Route` if the path pattern does not compile.
    pub fn register(&self, definition: RouteDefinition) -> Result<()> {
        let compiled = CompiledRoute::compile(definition)?;
        debug!(
            method = %compiled.definition.method,
            path = %compiled.definition.path,
            action = %compiled.definition.qualified_action(),
            "Registered route"
        );
        self.routes.write().push(Arc::new(compiled));
        Ok(())
    }

    /// Replace every registered route. Nothing changes if any definition
    /// fails to compile.
    ///
    /// # Errors
    ///
    /// Returns `Error::Route` for the first pattern that does not compile.
    pub fn replace_all(&self, definitions: impl IntoIterator<Item = RouteDefinition>) -> Result<()> {
        let compiled = definitions
            .into_iter()
            .map(|d| CompiledRoute::compile(d).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        *self.routes.write() = compiled;
        Ok(())
    }

    /// Find the first route matching `method` and `path`. Any query string is
    /// ignored.
    #[must_use]
    pub fn match_route(&self, method: HttpMethod, path: &str) -> Option<RouteMatch> {
        let path = path.split('?').next().unwrap_or(path);
        let routes = self.routes.read();
        for route in routes.iter() {
            if route.definition.method != method {
                continue;
            }
            if let Some(params) = route.pattern.captures(path) {
                return Some(RouteMatch {
                    route: Arc::clone(route),
                    params,
                });
            }
        }
        debug!(%method, path, "No route matched");
        None
    }

    /// Remove every route
    pub fn clear(&self) {
        self.routes.write().clear();
    }

    /// Number of registered routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    /// Whether no routes are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    /// Snapshot of registered definitions in registration order
    #[must_use]
    pub fn definitions(&self) -> Vec<RouteDefinition> {
        self.routes.read().iter().map(|r| r.definition.clone()).collect()
    }

    /// Pattern summaries in registration order
    #[must_use]
    pub fn patterns(&self) -> Vec<RoutePatternInfo> {
        self.routes
            .read()
            .iter()
            .map(|r| RoutePatternInfo {
                method: r.definition.method,
                path: r.definition.path.clone(),
                action: r.definition.qualified_action(),
                category: r.definition.category.clone(),
                auth: r.definition.auth,
                tools: r.definition.tools.clone(),
                multi_param: r.pattern.is_multi_param(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(method: HttpMethod, path: &str, action: &str) -> RouteDefinition {
        RouteDefinition::new(method, path, "newsletter", action)
    }

    #[test]
    fn first_registered_wins_over_more_specific() {
        let registry = RouteRegistry::new();
        registry.register(def(HttpMethod::Get, "/api/newsletters/:id", "read")).unwrap();
        registry.register(def(HttpMethod::Get, "/api/newsletters/latest", "latest")).unwrap();

        let m = registry.match_route(HttpMethod::Get, "/api/newsletters/latest").unwrap();
        assert_eq!(m.definition().action, "read");
        assert_eq!(m.params.id(), Some("latest"));
    }

    #[test]
    fn duplicate_registration_does_not_override() {
        let registry = RouteRegistry::new();
        registry.register(def(HttpMethod::Post, "/api/x", "first")).unwrap();
        registry.register(def(HttpMethod::Post, "/api/x", "second")).unwrap();

        assert_eq!(registry.len(), 2);
        let m = registry.match_route(HttpMethod::Post, "/api/x").unwrap();
        assert_eq!(m.definition().action, "first");
    }

    #[test]
    fn method_must_match() {
        let registry = RouteRegistry::new();
        registry.register(def(HttpMethod::Get, "/api/newsletters/:id", "read")).unwrap();
        assert!(registry.match_route(HttpMethod::Delete, "/api/newsletters/1").is_none());
    }

    #[test]
    fn query_string_ignored() {
        let registry = RouteRegistry::new();
        registry.register(def(HttpMethod::Get, "/api/newsletters", "list")).unwrap();
        assert!(registry.match_route(HttpMethod::Get, "/api/newsletters?limit=5").is_some());
    }

    #[test]
    fn clear_and_replace_all() {
        let registry = RouteRegistry::new();
        registry.register(def(HttpMethod::Get, "/a", "a")).unwrap();
        registry.clear();
        assert!(registry.is_empty());

        registry
            .replace_all(vec![def(HttpMethod::Get, "/b", "b"), def(HttpMethod::Get, "/c", "c")])
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.match_route(HttpMethod::Get, "/a").is_none());
    }

    #[test]
    fn replace_all_is_atomic_on_error() {
        let registry = RouteRegistry::new();
        registry.register(def(HttpMethod::Get, "/keep", "keep")).unwrap();
        let result = registry.replace_all(vec![def(HttpMethod::Get, "/ok", "ok"), def(HttpMethod::Get, "bad", "bad")]);
        assert!(result.is_err());
        assert!(registry.match_route(HttpMethod::Get, "/keep").is_some());
    }

    #[test]
    fn method_parsing_is_case_insensitive() {
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert!("BREW".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn qualified_action_includes_sub_action() {
        let d = def(HttpMethod::Post, "/api/generateEnhancedNewsletter", "generate").sub_action("enhanced");
        assert_eq!(d.qualified_action(), "newsletter.generate.enhanced");
    }

    #[test]
    fn definition_deserializes_from_yaml() {
        let yaml = r"
method: POST
path: /api/archive/:id
resource: newsletter
action: archive
auth: api_key
tools: [db-newsletter]
timeout: 5s
";
        let d: RouteDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(d.method, HttpMethod::Post);
        assert_eq!(d.auth, AuthType::ApiKey);
        assert_eq!(d.tools, vec![ToolId::from("db-newsletter")]);
        assert_eq!(d.timeout, Some(Duration::from_secs(5)));
    }
}
