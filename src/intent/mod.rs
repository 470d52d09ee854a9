//! Intent classification, execution planning and plan execution

mod classifier;
mod executor;
mod plan;

pub use classifier::{IntentClassifier, Resolution, ResolvedIntent};
pub use executor::{ExecutionReport, PlanExecutor, StepOutcome, StepStatus, ToolInvoker};
pub use plan::{
    ExecutionPlan, ExecutionPlanner, ExecutionStep, TimeoutTable, ToolClass, ToolId, create_execution_plan,
};
