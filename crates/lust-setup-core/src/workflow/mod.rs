//! Workflow orchestration: observe the host, plan the minimal corrective
//! steps, execute them in order, report what happened.

mod install;
mod lifecycle;
mod plan;
pub(crate) mod privilege;
mod uninstall;
mod units;

#[cfg(test)]
mod tests;

pub use install::{install, InstallOptions};
pub use lifecycle::{query_state, set_active, set_enabled};
pub use plan::{install_plan, uninstall_plan, PlanStep, ProvisionPlan, StepAction};
pub use privilege::ensure_root;
pub use uninstall::uninstall;
pub use units::render_default_unit;

/// Severity levels used when reporting workflow events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowLevel {
    Info,
    Success,
    Warn,
}

/// Single line of output produced by a workflow step.
#[derive(Debug, Clone)]
pub struct WorkflowEvent {
    pub level: WorkflowLevel,
    pub message: String,
}

/// Aggregated report returned by any workflow entry point.
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub title: String,
    pub events: Vec<WorkflowEvent>,
}

/// Convenience constructor that wraps the repeated boilerplate.
pub(crate) fn event(level: WorkflowLevel, message: impl Into<String>) -> WorkflowEvent {
    WorkflowEvent {
        level,
        message: message.into(),
    }
}
