//! Plan execution
//!
//! Runs an [`ExecutionPlan`] against a [`ToolInvoker`]. Steps run once all of
//! their dependencies have completed; ready steps flagged `parallel` run
//! together, others one at a time in order. Each invocation is bounded by its
//! step timeout and abandoned when the timeout elapses. Nothing is retried
//! here; retry policy belongs to the tool.

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use super::plan::{ExecutionPlan, ExecutionStep, ToolId};
use crate::context::RequestContext;
use crate::{Error, Result};

/// Invokes a single tool. Implemented by the tool layer.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invoke `tool` with `input`.
    ///
    /// `input` has the shape `{"request": <validated body>, "previous":
    /// {"<order>": <output>, ...}}`, where `previous` holds the outputs of the
    /// step's dependencies.
    async fn invoke(&self, tool: &ToolId, input: Value, ctx: &RequestContext) -> Result<Value>;
}

/// How a step ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    /// Tool returned a value
    Completed {
        /// Tool output
        output: Value,
    },
    /// Step timeout elapsed before the tool finished
    TimedOut {
        /// Timeout that elapsed
        timeout_ms: u64,
    },
    /// Tool returned an error
    Failed {
        /// Error description
        message: String,
    },
    /// Not run because a dependency did not complete
    Skipped {
        /// Dependency that blocked this step
        blocked_by: usize,
    },
}

/// Outcome of one step
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    /// Step order
    pub order: usize,
    /// Tool invoked
    pub tool_id: ToolId,
    /// Result
    #[serde(flatten)]
    pub status: StepStatus,
    /// Wall time spent, zero when skipped
    pub duration_ms: u64,
}

/// Outcome of a whole plan, in step order
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    /// Per-step outcomes
    pub steps: Vec<StepOutcome>,
}

impl ExecutionReport {
    /// Whether every step completed
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Completed { .. }))
    }

    /// Output of the last step, when it completed
    #[must_use]
    pub fn final_output(&self) -> Option<&Value> {
        match self.steps.last().map(|s| &s.status) {
            Some(StepStatus::Completed { output }) => Some(output),
            _ => None,
        }
    }

    /// First timeout or failure, as an error
    #[must_use]
    pub fn first_failure(&self) -> Option<Error> {
        self.steps.iter().find_map(|s| match &s.status {
            StepStatus::TimedOut { timeout_ms } => Some(Error::ToolTimeout {
                tool: s.tool_id.to_string(),
                timeout_ms: *timeout_ms,
            }),
            StepStatus::Failed { message } => Some(Error::Tool {
                tool: s.tool_id.to_string(),
                message: message.clone(),
            }),
            _ => None,
        })
    }
}

/// Executes plans against a tool invoker
pub struct PlanExecutor<'a> {
    invoker: &'a dyn ToolInvoker,
}

impl<'a> PlanExecutor<'a> {
    /// Create an executor
    #[must_use]
    pub fn new(invoker: &'a dyn ToolInvoker) -> Self {
        Self { invoker }
    }

    /// Run every step of `plan`
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the plan violates the dependency
    /// invariant. Tool failures are reported in the returned report.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        request: &Value,
        ctx: &RequestContext,
    ) -> Result<ExecutionReport> {
        plan.validate()?;

        let steps = plan.steps();
        let mut outcomes: Vec<Option<StepOutcome>> = vec![None; steps.len()];

        loop {
            let pending: Vec<&ExecutionStep> = steps
                .iter()
                .filter(|s| outcomes[s.order].is_none())
                .filter(|s| s.depends_on.iter().all(|d| outcomes[*d].is_some()))
                .collect();
            if pending.is_empty() {
                break;
            }

            let mut runnable = Vec::new();
            for step in pending {
                match blocking_dependency(step, &outcomes) {
                    Some(blocked_by) => {
                        debug!(step = step.order, tool = %step.tool_id, blocked_by, "Step skipped");
                        outcomes[step.order] = Some(StepOutcome {
                            order: step.order,
                            tool_id: step.tool_id.clone(),
                            status: StepStatus::Skipped { blocked_by },
                            duration_ms: 0,
                        });
                    }
                    None => runnable.push(step),
                }
            }

            let Some(&first) = runnable.first() else {
                continue;
            };
            let batch: Vec<&ExecutionStep> = if first.parallel {
                runnable.into_iter().filter(|s| s.parallel).collect()
            } else {
                vec![first]
            };

            let runs = batch.iter().map(|step| {
                let input = step_input(step, request, &outcomes);
                self.run_step(step, input, ctx)
            });
            for outcome in join_all(runs).await {
                let order = outcome.order;
                outcomes[order] = Some(outcome);
            }
        }

        Ok(ExecutionReport {
            steps: outcomes.into_iter().flatten().collect(),
        })
    }

    async fn run_step(&self, step: &ExecutionStep, input: Value, ctx: &RequestContext) -> StepOutcome {
        let started = Instant::now();
        let status = match tokio::time::timeout(step.timeout(), self.invoker.invoke(&step.tool_id, input, ctx)).await {
            Ok(Ok(output)) => StepStatus::Completed { output },
            Ok(Err(e)) => {
                error!(
                    correlation_id = %ctx.correlation_id,
                    step = step.order,
                    tool = %step.tool_id,
                    error = %e,
                    "Tool failed"
                );
                StepStatus::Failed { message: e.to_string() }
            }
            Err(_) => {
                warn!(
                    correlation_id = %ctx.correlation_id,
                    step = step.order,
                    tool = %step.tool_id,
                    timeout_ms = step.timeout_ms,
                    "Tool timed out, step abandoned"
                );
                StepStatus::TimedOut {
                    timeout_ms: step.timeout_ms,
                }
            }
        };

        StepOutcome {
            order: step.order,
            tool_id: step.tool_id.clone(),
            status,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// First dependency that did not complete
fn blocking_dependency(step: &ExecutionStep, outcomes: &[Option<StepOutcome>]) -> Option<usize> {
    step.depends_on.iter().copied().find(|d| {
        !matches!(
            outcomes[*d].as_ref().map(|o| &o.status),
            Some(StepStatus::Completed { .. })
        )
    })
}

fn step_input(step: &ExecutionStep, request: &Value, outcomes: &[Option<StepOutcome>]) -> Value {
    let previous: BTreeMap<String, Value> = step
        .depends_on
        .iter()
        .filter_map(|d| match outcomes[*d].as_ref().map(|o| &o.status) {
            Some(StepStatus::Completed { output }) => Some((d.to_string(), output.clone())),
            _ => None,
        })
        .collect();
    json!({ "request": request, "previous": previous })
}
