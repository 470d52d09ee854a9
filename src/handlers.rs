//! Intent handlers.
//!
//! The dispatcher hands each validated request to the handler registered for
//! its qualified action (`newsletter.generate`). Intents without a dedicated
//! handler but with tools fall back to the plan handler, which runs the
//! intent's execution plan against the tool layer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::auth::AuthResult;
use crate::context::RequestContext;
use crate::intent::{PlanExecutor, ResolvedIntent, ToolId, ToolInvoker};
use crate::{Error, Result};

/// Everything a handler gets besides the context
#[derive(Debug, Clone)]
pub struct HandlerInput {
    /// Classified intent
    pub intent: ResolvedIntent,
    /// Validated path parameters
    pub params: Value,
    /// Validated query parameters
    pub query: Value,
    /// Validated, sanitized body
    pub body: Value,
    /// Auth outcome, when the route required a credential
    pub auth: Option<AuthResult>,
}

/// Produces the response data for an intent
#[async_trait]
pub trait IntentHandler: Send + Sync {
    /// Handle the request. The returned value becomes the envelope's `data`.
    async fn handle(&self, input: HandlerInput, ctx: &RequestContext) -> Result<Value>;
}

/// Handlers by qualified action, with an optional fallback for tool-backed
/// intents
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn IntentHandler>>,
    fallback: Option<Arc<dyn IntentHandler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut actions: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        actions.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("actions", &actions)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

impl HandlerRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for a qualified action, replacing any previous one
    #[must_use]
    pub fn register(mut self, action: &str, handler: impl IntentHandler + 'static) -> Self {
        self.handlers.insert(action.to_string(), Arc::new(handler));
        self
    }

    /// Handler for intents that have tools but no dedicated handler
    #[must_use]
    pub fn fallback(mut self, handler: impl IntentHandler + 'static) -> Self {
        self.fallback = Some(Arc::new(handler));
        self
    }

    /// Handler for `intent`, if any
    #[must_use]
    pub fn get(&self, intent: &ResolvedIntent) -> Option<Arc<dyn IntentHandler>> {
        let action = intent.qualified_action();
        if let Some(handler) = self.handlers.get(&action) {
            return Some(Arc::clone(handler));
        }
        if intent.tools.is_empty() {
            return None;
        }
        self.fallback.clone()
    }

    /// Registered actions
    #[must_use]
    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.handlers.keys().cloned().collect();
        actions.sort_unstable();
        actions
    }
}

/// `health.check`
#[derive(Debug, Clone)]
pub struct HealthHandler {
    started: Instant,
}

impl Default for HealthHandler {
    fn default() -> Self {
        Self { started: Instant::now() }
    }
}

#[async_trait]
impl IntentHandler for HealthHandler {
    async fn handle(&self, _input: HandlerInput, _ctx: &RequestContext) -> Result<Value> {
        Ok(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptimeSeconds": self.started.elapsed().as_secs(),
        }))
    }
}

/// Runs the intent's execution plan and returns the step report
pub struct PlanHandler {
    invoker: Arc<dyn ToolInvoker>,
}

impl PlanHandler {
    /// Plan handler invoking tools through `invoker`
    #[must_use]
    pub fn new(invoker: Arc<dyn ToolInvoker>) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl IntentHandler for PlanHandler {
    async fn handle(&self, input: HandlerInput, ctx: &RequestContext) -> Result<Value> {
        let request = json!({
            "params": input.params,
            "query": input.query,
            "body": input.body,
        });
        let executor = PlanExecutor::new(self.invoker.as_ref());
        let report = executor.execute(&input.intent.execution_plan, &request, ctx).await?;

        if let Some(failure) = report.first_failure() {
            warn!(
                correlation_id = %ctx.correlation_id,
                intent = %input.intent.qualified_action(),
                error = %failure,
                "Execution plan did not complete"
            );
            return Err(failure);
        }

        debug!(
            correlation_id = %ctx.correlation_id,
            intent = %input.intent.qualified_action(),
            steps = report.steps.len(),
            "Execution plan completed"
        );
        Ok(json!({
            "intent": input.intent.qualified_action(),
            "result": report.final_output().cloned().unwrap_or(Value::Null),
            "steps": report.steps,
        }))
    }
}

/// Tool invokers by tool id. Unknown tools fail with `Error::Tool`.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolInvoker>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("ToolRegistry").field("tools", &ids).finish()
    }
}

impl ToolRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an invoker for `tool`
    #[must_use]
    pub fn register(mut self, tool: &str, invoker: impl ToolInvoker + 'static) -> Self {
        self.tools.insert(tool.to_string(), Arc::new(invoker));
        self
    }

    /// Whether `tool` has an invoker
    #[must_use]
    pub fn contains(&self, tool: &str) -> bool {
        self.tools.contains_key(tool)
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn invoke(&self, tool: &ToolId, input: Value, ctx: &RequestContext) -> Result<Value> {
        match self.tools.get(tool.as_str()) {
            Some(invoker) => invoker.invoke(tool, input, ctx).await,
            None => Err(Error::Tool {
                tool: tool.to_string(),
                message: "no invoker registered".to_string(),
            }),
        }
    }
}

/// Registry with `health.check` and the plan handler as fallback
#[must_use]
pub fn default_handlers(tools: Arc<dyn ToolInvoker>) -> HandlerRegistry {
    HandlerRegistry::new()
        .register("health.check", HealthHandler::default())
        .fallback(PlanHandler::new(tools))
}
