//! Intent classification

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::plan::{ExecutionPlan, ExecutionPlanner, ToolId};
use crate::auth::AuthType;
use crate::routing::{HttpMethod, RouteMatch, RoutePatternInfo, RouteRegistry};

/// Structured intent derived from a request's method and path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedIntent {
    /// Action on the resource
    pub action: String,
    /// Resource name
    pub resource: String,
    /// Refinement of the action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_action: Option<String>,
    /// Tools to invoke
    pub tools: Vec<ToolId>,
    /// Whether any credential is required
    pub auth_required: bool,
    /// Which credential is required
    pub auth_type: AuthType,
    /// Steps to run
    pub execution_plan: ExecutionPlan,
}

impl ResolvedIntent {
    /// `resource.action[.sub_action]`
    #[must_use]
    pub fn qualified_action(&self) -> String {
        match &self.sub_action {
            Some(sub) => format!("{}.{}.{sub}", self.resource, self.action),
            None => format!("{}.{}", self.resource, self.action),
        }
    }
}

/// Intent plus the route match it came from
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Classified intent
    pub intent: ResolvedIntent,
    /// Underlying match (definition and path parameters)
    pub matched: RouteMatch,
}

/// Maps `(method, path)` to intents through the route registry
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    registry: Arc<RouteRegistry>,
    planner: ExecutionPlanner,
}

impl IntentClassifier {
    /// Create a classifier over a registry
    #[must_use]
    pub fn new(registry: Arc<RouteRegistry>, planner: ExecutionPlanner) -> Self {
        Self { registry, planner }
    }

    /// Registry backing this classifier
    #[must_use]
    pub fn registry(&self) -> &Arc<RouteRegistry> {
        &self.registry
    }

    /// Planner backing this classifier
    #[must_use]
    pub fn planner(&self) -> &ExecutionPlanner {
        &self.planner
    }

    /// Classify a request. `None` when no route matches.
    #[must_use]
    pub fn classify(&self, method: HttpMethod, path: &str) -> Option<ResolvedIntent> {
        self.resolve(method, path).map(|r| r.intent)
    }

    /// Classify a request and keep the route match
    #[must_use]
    pub fn resolve(&self, method: HttpMethod, path: &str) -> Option<Resolution> {
        let matched = self.registry.match_route(method, path)?;
        let definition = matched.definition();
        let intent = ResolvedIntent {
            action: definition.action.clone(),
            resource: definition.resource.clone(),
            sub_action: definition.sub_action.clone(),
            tools: definition.tools.clone(),
            auth_required: definition.auth.is_required(),
            auth_type: definition.auth,
            execution_plan: self.planner.create_execution_plan(&definition.tools),
        };
        debug!(
            %method,
            path,
            intent = %intent.qualified_action(),
            steps = intent.execution_plan.len(),
            "Classified request"
        );
        Some(Resolution { intent, matched })
    }

    /// Auth type required for a request, if any route matches
    #[must_use]
    pub fn auth_type(&self, method: HttpMethod, path: &str) -> Option<AuthType> {
        self.registry
            .match_route(method, path)
            .map(|m| m.definition().auth)
    }

    /// Whether an intent needs credentials
    #[must_use]
    pub fn requires_auth(intent: &ResolvedIntent) -> bool {
        intent.auth_required
    }

    /// All registered patterns, for documentation
    #[must_use]
    pub fn all_route_patterns(&self) -> Vec<RoutePatternInfo> {
        self.registry.patterns()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{RouteDefinition, table::default_routes};

    fn classifier() -> IntentClassifier {
        let registry = Arc::new(RouteRegistry::with_routes(default_routes()).unwrap());
        IntentClassifier::new(registry, ExecutionPlanner::default())
    }

    #[test]
    fn generate_newsletter_intent() {
        let intent = classifier()
            .classify(HttpMethod::Post, "/api/generateNewsletter")
            .unwrap();

        assert_eq!(intent.resource, "newsletter");
        assert_eq!(intent.action, "generate");
        assert_eq!(
            intent.tools,
            vec![ToolId::from("claude"), ToolId::from("stability"), ToolId::from("db-newsletter")]
        );
        assert!(intent.auth_required);
        assert_eq!(intent.execution_plan.len(), 3);
    }

    #[test]
    fn unmatched_request_is_none() {
        assert!(classifier().classify(HttpMethod::Get, "/api/nope").is_none());
        assert!(classifier().auth_type(HttpMethod::Get, "/api/nope").is_none());
    }

    #[test]
    fn auth_projection() {
        let c = classifier();
        assert_eq!(c.auth_type(HttpMethod::Post, "/api/saveToDrive"), Some(AuthType::Oauth));
        assert_eq!(c.auth_type(HttpMethod::Get, "/api/health"), Some(AuthType::None));

        let health = c.classify(HttpMethod::Get, "/api/health").unwrap();
        assert!(!IntentClassifier::requires_auth(&health));
        assert!(health.execution_plan.is_empty());
    }

    #[test]
    fn resolve_keeps_params() {
        let r = classifier()
            .resolve(HttpMethod::Get, "/api/newsletters/abc123")
            .unwrap();
        assert_eq!(r.matched.params.id(), Some("abc123"));
        assert_eq!(r.intent.qualified_action(), "newsletter.read");
    }

    #[test]
    fn patterns_follow_registration_order() {
        let registry = Arc::new(RouteRegistry::new());
        registry
            .register(RouteDefinition::new(HttpMethod::Get, "/b", "b", "read"))
            .unwrap();
        registry
            .register(RouteDefinition::new(HttpMethod::Get, "/a", "a", "read"))
            .unwrap();
        let c = IntentClassifier::new(registry, ExecutionPlanner::default());
        let paths: Vec<_> = c.all_route_patterns().into_iter().map(|p| p.path).collect();
        assert_eq!(paths, vec!["/b", "/a"]);
    }
}
