//! Provisioner: drives the host from any observed state to
//! installed-and-running.

use super::plan::{execute, install_plan};
use super::WorkflowReport;
use crate::config::TargetSpec;
use crate::error::{SetupError, SetupResult};
use crate::provider::{IdentityProvider, ServiceManager};
use crate::state::observe;
use log::info;

/// Caller knobs for one install run.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Overwrite an existing config file even when the host copy differs
    /// from the template. Off by default: a user-edited config survives
    /// re-runs.
    pub force_config: bool,
}

/// Observe, plan, and apply the steps that reach installed-and-running.
/// Aborts on the first failing step with no rollback; re-running the same
/// operation resumes from the failure point.
pub fn install<M, I>(
    spec: &TargetSpec,
    manager: &M,
    identity: &I,
    options: InstallOptions,
) -> SetupResult<WorkflowReport>
where
    M: ServiceManager<Error = SetupError>,
    I: IdentityProvider<Error = SetupError>,
{
    spec.validate()?;
    let unit = spec.unit_name();
    let state = observe(spec, manager, identity)?;
    let plan = install_plan(&state, spec, options.force_config)?;
    info!(
        "install plan for {unit}: {} step(s)",
        plan.steps.len()
    );

    let mut events = Vec::new();
    execute(&plan, spec, manager, identity, &mut events)?;
    Ok(WorkflowReport {
        title: format!("Provisioned {unit}"),
        events,
    })
}
