//! Execution planning
//!
//! Turns a route's tool list into ordered, dependency-annotated steps. Each
//! step carries a timeout picked from a per-tool-class table:
//!
//! | Class | Tools | Default |
//! |-------|-------|---------|
//! | AI generation | `claude*`, `gemini*`, `openai*` | 60s |
//! | External API | `stability*`, `google-*`, `brave*`, `search*` | 30s |
//! | Everything else | storage, rendering, ... | 10s |
//!
//! The exact values are configurable; the ordering AI > external > default is
//! enforced when the table is built.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::PlannerConfig;
use crate::{Error, Result};

/// Identifier of an external tool (an AI provider, a storage accessor, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolId(String);

impl ToolId {
    /// Create a tool id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as `&str`
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ToolId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ToolId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Timeout class of a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolClass {
    /// AI content/image generation
    AiGeneration,
    /// Search and third-party integrations
    ExternalApi,
    /// Storage and local work
    Default,
}

/// One step of an execution plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    /// Position in the plan, starting at 0
    pub order: usize,
    /// Tool to invoke
    pub tool_id: ToolId,
    /// Whether the step may run concurrently with other ready steps
    pub parallel: bool,
    /// Orders of steps that must complete first. Only earlier orders.
    pub depends_on: Vec<usize>,
    /// Step timeout in milliseconds
    pub timeout_ms: u64,
}

impl ExecutionStep {
    /// Step timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Ordered list of execution steps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionPlan(Vec<ExecutionStep>);

impl ExecutionPlan {
    /// Build a plan from explicit steps, checking the dependency invariant
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if a step is out of order or depends on
    /// itself or a later step.
    pub fn from_steps(steps: Vec<ExecutionStep>) -> Result<Self> {
        let plan = Self(steps);
        plan.validate()?;
        Ok(plan)
    }

    /// Check that orders are `0..n` and every dependency points backwards
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        for (index, step) in self.0.iter().enumerate() {
            if step.order != index {
                return Err(Error::Internal(format!(
                    "step for '{}' has order {} at position {index}",
                    step.tool_id, step.order
                )));
            }
            if let Some(dep) = step.depends_on.iter().find(|dep| **dep >= step.order) {
                return Err(Error::Internal(format!(
                    "step {} ('{}') depends on step {dep}, which does not precede it",
                    step.order, step.tool_id
                )));
            }
        }
        Ok(())
    }

    /// Steps in order
    #[must_use]
    pub fn steps(&self) -> &[ExecutionStep] {
        &self.0
    }

    /// Number of steps
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the plan has no steps
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of step timeouts, an upper bound for a sequential run
    #[must_use]
    pub fn total_timeout(&self) -> Duration {
        self.0.iter().map(ExecutionStep::timeout).sum()
    }
}

/// Per-class timeout lookup
#[derive(Debug, Clone)]
pub struct TimeoutTable {
    ai: Duration,
    external: Duration,
    default: Duration,
    ai_prefixes: Vec<String>,
    external_prefixes: Vec<String>,
}

impl TimeoutTable {
    /// Build from planner configuration. Ordering (AI > external > default)
    /// is enforced by `Config::validate`.
    #[must_use]
    pub fn from_config(config: &PlannerConfig) -> Self {
        Self {
            ai: config.ai_timeout,
            external: config.external_timeout,
            default: config.default_timeout,
            ai_prefixes: config.ai_prefixes.clone(),
            external_prefixes: config.external_prefixes.clone(),
        }
    }

    /// Classify a tool by id prefix
    #[must_use]
    pub fn classify(&self, tool: &ToolId) -> ToolClass {
        let id = tool.as_str();
        if self.ai_prefixes.iter().any(|p| id.starts_with(p.as_str())) {
            ToolClass::AiGeneration
        } else if self.external_prefixes.iter().any(|p| id.starts_with(p.as_str())) {
            ToolClass::ExternalApi
        } else {
            ToolClass::Default
        }
    }

    /// Timeout for a tool
    #[must_use]
    pub fn timeout_for(&self, tool: &ToolId) -> Duration {
        match self.classify(tool) {
            ToolClass::AiGeneration => self.ai,
            ToolClass::ExternalApi => self.external,
            ToolClass::Default => self.default,
        }
    }
}

impl Default for TimeoutTable {
    fn default() -> Self {
        Self {
            ai: Duration::from_secs(60),
            external: Duration::from_secs(30),
            default: Duration::from_secs(10),
            ai_prefixes: PlannerConfig::default().ai_prefixes,
            external_prefixes: PlannerConfig::default().external_prefixes,
        }
    }
}

/// Builds execution plans from tool lists
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlanner {
    timeouts: TimeoutTable,
}

impl ExecutionPlanner {
    /// Create a planner with the given timeout table
    #[must_use]
    pub fn new(timeouts: TimeoutTable) -> Self {
        Self { timeouts }
    }

    /// Timeout table in use
    #[must_use]
    pub fn timeouts(&self) -> &TimeoutTable {
        &self.timeouts
    }

    /// Strictly sequential plan: step `i` depends on step `i - 1`
    #[must_use]
    pub fn create_execution_plan(&self, tools: &[ToolId]) -> ExecutionPlan {
        ExecutionPlan(
            tools
                .iter()
                .enumerate()
                .map(|(order, tool)| ExecutionStep {
                    order,
                    tool_id: tool.clone(),
                    parallel: false,
                    depends_on: if order == 0 { Vec::new() } else { vec![order - 1] },
                    timeout_ms: millis(self.timeouts.timeout_for(tool)),
                })
                .collect(),
        )
    }

    /// Fan-out plan: no dependencies, every step parallel
    #[must_use]
    pub fn create_parallel_plan(&self, tools: &[ToolId]) -> ExecutionPlan {
        ExecutionPlan(
            tools
                .iter()
                .enumerate()
                .map(|(order, tool)| ExecutionStep {
                    order,
                    tool_id: tool.clone(),
                    parallel: true,
                    depends_on: Vec::new(),
                    timeout_ms: millis(self.timeouts.timeout_for(tool)),
                })
                .collect(),
        )
    }
}

/// Sequential plan using the default timeout table
#[must_use]
pub fn create_execution_plan(tools: &[ToolId]) -> ExecutionPlan {
    ExecutionPlanner::default().create_execution_plan(tools)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools(ids: &[&str]) -> Vec<ToolId> {
        ids.iter().map(|t| ToolId::from(*t)).collect()
    }

    #[test]
    fn sequential_plan_shape() {
        let plan = create_execution_plan(&tools(&["claude", "stability", "db-newsletter"]));
        let steps = plan.steps();

        assert_eq!(steps.iter().map(|s| s.order).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(
            steps.iter().map(|s| s.depends_on.clone()).collect::<Vec<_>>(),
            vec![vec![], vec![0], vec![1]]
        );
        assert!(steps.iter().all(|s| !s.parallel));
        assert!(steps[0].timeout_ms > steps[1].timeout_ms);
        assert!(steps[1].timeout_ms > steps[2].timeout_ms);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn empty_tool_list_gives_empty_plan() {
        let plan = create_execution_plan(&[]);
        assert!(plan.is_empty());
        assert_eq!(plan.total_timeout(), Duration::ZERO);
    }

    #[test]
    fn tool_classes() {
        let table = TimeoutTable::default();
        assert_eq!(table.classify(&"claude-3".into()), ToolClass::AiGeneration);
        assert_eq!(table.classify(&"gemini".into()), ToolClass::AiGeneration);
        assert_eq!(table.classify(&"google-drive".into()), ToolClass::ExternalApi);
        assert_eq!(table.classify(&"brave-search".into()), ToolClass::ExternalApi);
        assert_eq!(table.classify(&"db-prompts".into()), ToolClass::Default);
    }

    #[test]
    fn parallel_plan_has_no_dependencies() {
        let plan = ExecutionPlanner::default().create_parallel_plan(&tools(&["google-drive", "google-sheets"]));
        assert!(plan.steps().iter().all(|s| s.parallel && s.depends_on.is_empty()));
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn multi_dependency_steps_allowed() {
        let plan = ExecutionPlan::from_steps(vec![
            ExecutionStep { order: 0, tool_id: "a".into(), parallel: true, depends_on: vec![], timeout_ms: 10 },
            ExecutionStep { order: 1, tool_id: "b".into(), parallel: true, depends_on: vec![], timeout_ms: 10 },
            ExecutionStep { order: 2, tool_id: "c".into(), parallel: false, depends_on: vec![0, 1], timeout_ms: 10 },
        ]);
        assert!(plan.is_ok());
    }

    #[test]
    fn forward_and_self_references_rejected() {
        let forward = ExecutionPlan::from_steps(vec![
            ExecutionStep { order: 0, tool_id: "a".into(), parallel: false, depends_on: vec![1], timeout_ms: 10 },
            ExecutionStep { order: 1, tool_id: "b".into(), parallel: false, depends_on: vec![], timeout_ms: 10 },
        ]);
        assert!(forward.is_err());

        let cyclic = ExecutionPlan::from_steps(vec![ExecutionStep {
            order: 0,
            tool_id: "a".into(),
            parallel: false,
            depends_on: vec![0],
            timeout_ms: 10,
        }]);
        assert!(cyclic.is_err());
    }

    #[test]
    fn timeout_table_follows_config() {
        let config = PlannerConfig {
            ai_timeout: Duration::from_secs(90),
            ai_prefixes: vec!["mistral".to_string()],
            ..PlannerConfig::default()
        };
        let table = TimeoutTable::from_config(&config);
        assert_eq!(table.timeout_for(&ToolId::from("mistral-large")), Duration::from_secs(90));
        assert_eq!(table.classify(&ToolId::from("claude")), ToolClass::Default);
    }

    #[test]
    fn steps_serialize_camel_case() {
        let plan = create_execution_plan(&tools(&["claude"]));
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json[0]["toolId"], "claude");
        assert!(json[0]["dependsOn"].as_array().unwrap().is_empty());
        assert!(json[0]["timeoutMs"].as_u64().unwrap() > 0);
    }
}
