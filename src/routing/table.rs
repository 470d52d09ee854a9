//! Built-in route table for the newsletter control plane

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Value, json};

use super::registry::{HttpMethod, RouteDefinition};
use crate::auth::AuthType;

use HttpMethod::{Delete, Get, Post, Put};

/// Default route definitions in precedence order.
///
/// Literal paths that share a prefix with a parameterised path are listed
/// first, since the first matching definition wins.
#[must_use]
pub fn default_routes() -> Vec<RouteDefinition> {
    vec![
        // Generation
        RouteDefinition::new(Post, "/api/generateNewsletter", "newsletter", "generate")
            .category("generation")
            .auth(AuthType::ApiKey)
            .tools(&["claude", "stability", "db-newsletter"])
            .rate_limit_tier("ai"),
        RouteDefinition::new(Post, "/api/generateEnhancedNewsletter", "newsletter", "generate")
            .sub_action("enhanced")
            .category("generation")
            .auth(AuthType::ApiKey)
            .tools(&["brave-search", "claude", "stability", "db-newsletter"])
            .rate_limit_tier("ai")
            .timeout(Duration::from_secs(180)),
        RouteDefinition::new(Post, "/api/generateTopics", "topics", "generate")
            .category("generation")
            .auth(AuthType::ApiKey)
            .tools(&["brave-search", "claude"])
            .rate_limit_tier("ai"),
        RouteDefinition::new(Post, "/api/generateImage", "image", "generate")
            .category("generation")
            .auth(AuthType::ApiKey)
            .tools(&["stability"])
            .rate_limit_tier("ai"),
        RouteDefinition::new(Post, "/api/generatePresets", "preset", "generate")
            .category("generation")
            .auth(AuthType::ApiKey)
            .tools(&["claude", "db-presets"])
            .rate_limit_tier("ai"),
        // Newsletters
        RouteDefinition::new(Get, "/api/newsletters", "newsletter", "list")
            .category("storage")
            .tools(&["db-newsletter"]),
        RouteDefinition::new(Get, "/api/newsletters/:id/logs", "newsletter", "read")
            .sub_action("logs")
            .category("storage")
            .tools(&["db-logs"]),
        RouteDefinition::new(Get, "/api/newsletters/:id", "newsletter", "read")
            .category("storage")
            .tools(&["db-newsletter"]),
        RouteDefinition::new(Put, "/api/newsletters/:id", "newsletter", "update")
            .category("storage")
            .auth(AuthType::ApiKey)
            .tools(&["db-newsletter"]),
        RouteDefinition::new(Delete, "/api/newsletters/:id", "newsletter", "delete")
            .category("storage")
            .auth(AuthType::ApiKey)
            .tools(&["db-newsletter"]),
        // Prompts
        RouteDefinition::new(Get, "/api/prompts", "prompt", "list")
            .category("storage")
            .tools(&["db-prompts"]),
        RouteDefinition::new(Post, "/api/prompts/import", "prompt", "import")
            .category("storage")
            .auth(AuthType::ApiKey)
            .tools(&["claude", "db-prompts"])
            .rate_limit_tier("ai"),
        RouteDefinition::new(Post, "/api/prompts", "prompt", "create")
            .category("storage")
            .auth(AuthType::ApiKey)
            .tools(&["db-prompts"]),
        RouteDefinition::new(Delete, "/api/prompts/:id", "prompt", "delete")
            .category("storage")
            .auth(AuthType::ApiKey)
            .tools(&["db-prompts"]),
        // Subscribers
        RouteDefinition::new(Get, "/api/subscribers", "subscriber", "list")
            .category("storage")
            .auth(AuthType::ApiKey)
            .tools(&["db-subscribers"]),
        RouteDefinition::new(Post, "/api/subscribers", "subscriber", "create")
            .category("storage")
            .auth(AuthType::ApiKey)
            .tools(&["db-subscribers"]),
        RouteDefinition::new(Get, "/api/subscriber-lists/:id", "subscriberList", "read")
            .category("storage")
            .auth(AuthType::ApiKey)
            .tools(&["db-subscribers"]),
        // Scheduling
        RouteDefinition::new(Post, "/api/scheduledSends", "schedule", "create")
            .category("storage")
            .auth(AuthType::ApiKey)
            .tools(&["db-schedules"]),
        RouteDefinition::new(Delete, "/api/scheduledSends/:id", "schedule", "cancel")
            .category("storage")
            .auth(AuthType::ApiKey)
            .tools(&["db-schedules"]),
        // Google integrations
        RouteDefinition::new(Post, "/api/saveToDrive", "drive", "save")
            .category("google")
            .auth(AuthType::Oauth)
            .tools(&["google-drive"])
            .rate_limit_tier("standard"),
        RouteDefinition::new(Get, "/api/loadFromDrive/:id", "drive", "load")
            .category("google")
            .auth(AuthType::Oauth)
            .tools(&["google-drive"])
            .rate_limit_tier("standard"),
        RouteDefinition::new(Post, "/api/sendEmail", "email", "send")
            .category("google")
            .auth(AuthType::Oauth)
            .tools(&["email-renderer", "google-gmail", "db-logs"])
            .rate_limit_tier("standard"),
        RouteDefinition::new(Post, "/api/sheets/sync", "sheets", "sync")
            .category("google")
            .auth(AuthType::Oauth)
            .tools(&["google-sheets", "db-subscribers"])
            .rate_limit_tier("standard"),
        // OAuth handshake
        RouteDefinition::new(Get, "/api/oauth/google/url", "oauth", "authorize")
            .category("auth")
            .tools(&["google-oauth"]),
        RouteDefinition::new(Get, "/api/oauth/google/callback", "oauth", "callback")
            .category("auth")
            .tools(&["google-oauth", "db-credentials"]),
        RouteDefinition::new(Get, "/api/oauth/status", "oauth", "status")
            .category("auth")
            .auth(AuthType::Oauth)
            .tools(&["db-credentials"]),
        // System
        RouteDefinition::new(Get, "/api/health", "health", "check").category("system"),
        RouteDefinition::new(Get, "/api/logs/audit", "audit", "list")
            .category("system")
            .auth(AuthType::ApiKey)
            .tools(&["db-logs"]),
    ]
}

/// Input schemas for one route. `Value::Null` accepts anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteSchema {
    /// Request body schema
    pub body: Value,
    /// Query string schema
    pub query: Value,
    /// Path parameter schema
    pub params: Value,
}

impl RouteSchema {
    fn body(body: Value) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }

    fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    fn query(mut self, query: Value) -> Self {
        self.query = query;
        self
    }
}

fn id_params() -> Value {
    json!({
        "type": "object",
        "required": ["id"],
        "properties": {"id": {"type": "string", "minLength": 1, "maxLength": 128}}
    })
}

fn paging_query() -> Value {
    json!({
        "type": "object",
        "properties": {
            "limit": {"type": "integer", "minimum": 1, "maximum": 100},
            "offset": {"type": "integer", "minimum": 0}
        }
    })
}

fn generation_body() -> Value {
    json!({
        "type": "object",
        "required": ["topics"],
        "properties": {
            "topics": {
                "type": "array",
                "minItems": 1,
                "maxItems": 10,
                "items": {"type": "string", "minLength": 1, "maxLength": 200}
            },
            "audience": {"type": "array", "items": {"type": "string", "maxLength": 100}},
            "tone": {"type": "string", "enum": ["professional", "casual", "witty", "enthusiastic", "informative"]},
            "flavors": {"type": "array", "items": {"type": "string"}},
            "imageStyle": {"type": "string", "maxLength": 100},
            "includeImages": {"type": "boolean"}
        }
    })
}

/// Input schemas for the built-in routes, keyed by qualified action.
/// Routes without an entry accept any input.
#[must_use]
pub fn default_schemas() -> HashMap<String, RouteSchema> {
    let mut enhanced = generation_body();
    enhanced["properties"]["sources"] = json!({
        "type": "array",
        "maxItems": 20,
        "items": {"type": "string", "maxLength": 2048}
    });

    HashMap::from([
        ("newsletter.generate".to_string(), RouteSchema::body(generation_body())),
        ("newsletter.generate.enhanced".to_string(), RouteSchema::body(enhanced)),
        (
            "topics.generate".to_string(),
            RouteSchema::body(json!({
                "type": "object",
                "properties": {
                    "audience": {"type": "array", "items": {"type": "string"}},
                    "count": {"type": "integer", "minimum": 1, "maximum": 20}
                }
            })),
        ),
        (
            "image.generate".to_string(),
            RouteSchema::body(json!({
                "type": "object",
                "required": ["prompt"],
                "properties": {
                    "prompt": {"type": "string", "minLength": 3, "maxLength": 2000},
                    "style": {"type": "string", "maxLength": 100}
                }
            })),
        ),
        ("newsletter.list".to_string(), RouteSchema::default().query(paging_query())),
        ("newsletter.read".to_string(), RouteSchema::default().params(id_params())),
        ("newsletter.read.logs".to_string(), RouteSchema::default().params(id_params())),
        (
            "newsletter.update".to_string(),
            RouteSchema::body(json!({
                "type": "object",
                "properties": {
                    "subject": {"type": "string", "minLength": 1, "maxLength": 300},
                    "introduction": {"type": "string"},
                    "conclusion": {"type": "string"},
                    "sections": {"type": "array", "items": {"type": "object"}}
                }
            }))
            .params(id_params()),
        ),
        ("newsletter.delete".to_string(), RouteSchema::default().params(id_params())),
        (
            "prompt.create".to_string(),
            RouteSchema::body(json!({
                "type": "object",
                "required": ["title", "content"],
                "properties": {
                    "title": {"type": "string", "minLength": 1, "maxLength": 200},
                    "content": {"type": "string", "minLength": 1}
                }
            })),
        ),
        (
            "subscriber.create".to_string(),
            RouteSchema::body(json!({
                "type": "object",
                "required": ["email"],
                "properties": {
                    "email": {"type": "string", "minLength": 3, "maxLength": 254},
                    "name": {"type": "string", "maxLength": 200},
                    "lists": {"type": "array", "items": {"type": "string"}}
                }
            })),
        ),
        (
            "schedule.create".to_string(),
            RouteSchema::body(json!({
                "type": "object",
                "required": ["newsletterId", "scheduledAt", "recipients"],
                "properties": {
                    "newsletterId": {"type": "string", "minLength": 1},
                    "scheduledAt": {"type": "string", "minLength": 1},
                    "recipients": {"type": "array", "minItems": 1, "items": {"type": "string"}}
                }
            })),
        ),
        (
            "drive.save".to_string(),
            RouteSchema::body(json!({
                "type": "object",
                "required": ["newsletterId"],
                "properties": {
                    "newsletterId": {"type": "string", "minLength": 1},
                    "folderId": {"type": "string"}
                }
            })),
        ),
        (
            "email.send".to_string(),
            RouteSchema::body(json!({
                "type": "object",
                "required": ["newsletterId", "to"],
                "properties": {
                    "newsletterId": {"type": "string", "minLength": 1},
                    "to": {"type": "array", "minItems": 1, "maxItems": 500, "items": {"type": "string", "minLength": 3}},
                    "subject": {"type": "string", "maxLength": 300}
                }
            })),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RouteRegistry;

    #[test]
    fn default_table_compiles() {
        let registry = RouteRegistry::with_routes(default_routes()).unwrap();
        assert_eq!(registry.len(), default_routes().len());
    }

    #[test]
    fn documented_routes_resolve() {
        let registry = RouteRegistry::with_routes(default_routes()).unwrap();
        let cases = [
            (Post, "/api/generateNewsletter", "newsletter.generate", AuthType::ApiKey),
            (Post, "/api/generateEnhancedNewsletter", "newsletter.generate.enhanced", AuthType::ApiKey),
            (Get, "/api/newsletters/abc", "newsletter.read", AuthType::None),
            (Post, "/api/saveToDrive", "drive.save", AuthType::Oauth),
            (Post, "/api/sendEmail", "email.send", AuthType::Oauth),
            (Get, "/api/health", "health.check", AuthType::None),
        ];
        for (method, path, action, auth) in cases {
            let m = registry.match_route(method, path).unwrap_or_else(|| panic!("{method} {path}"));
            assert_eq!(m.definition().qualified_action(), action);
            assert_eq!(m.definition().auth, auth);
        }
    }

    #[test]
    fn literal_routes_take_precedence() {
        let registry = RouteRegistry::with_routes(default_routes()).unwrap();
        let m = registry.match_route(Post, "/api/prompts/import").unwrap();
        assert_eq!(m.definition().qualified_action(), "prompt.import");
        let m = registry.match_route(Get, "/api/newsletters/n1/logs").unwrap();
        assert_eq!(m.definition().qualified_action(), "newsletter.read.logs");
    }

    #[test]
    fn schemas_refer_to_known_actions() {
        let actions: Vec<String> = default_routes().iter().map(RouteDefinition::qualified_action).collect();
        for action in default_schemas().keys() {
            assert!(actions.contains(action), "schema for unknown action {action}");
        }
    }

    #[test]
    fn schemas_are_well_formed() {
        for (action, schema) in default_schemas() {
            for s in [&schema.body, &schema.query, &schema.params] {
                assert!(
                    crate::validation::schema::validate(&json!({}), s).is_ok(),
                    "malformed schema for {action}"
                );
            }
        }
    }
}
