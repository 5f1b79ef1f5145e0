//! Decommissioner: drives the host from any installed sub-state back to
//! fully absent.

use super::plan::{execute, uninstall_plan};
use super::{event, WorkflowLevel, WorkflowReport};
use crate::config::TargetSpec;
use crate::error::{SetupError, SetupResult};
use crate::provider::{IdentityProvider, ServiceManager};
use crate::state::observe;
use log::info;

/// Observe, plan, and apply the steps that remove every managed trace of
/// the service. A host where the service was never installed yields an
/// empty plan and succeeds as a no-op.
pub fn uninstall<M, I>(spec: &TargetSpec, manager: &M, identity: &I) -> SetupResult<WorkflowReport>
where
    M: ServiceManager<Error = SetupError>,
    I: IdentityProvider<Error = SetupError>,
{
    spec.validate()?;
    let unit = spec.unit_name();
    let state = observe(spec, manager, identity)?;
    let plan = uninstall_plan(&state, spec)?;
    info!(
        "uninstall plan for {unit}: {} step(s)",
        plan.steps.len()
    );

    let mut events = Vec::new();
    if plan.is_empty() {
        events.push(event(
            WorkflowLevel::Info,
            format!("{unit} is not installed; nothing to remove"),
        ));
    } else {
        execute(&plan, spec, manager, identity, &mut events)?;
    }
    Ok(WorkflowReport {
        title: format!("Decommissioned {unit}"),
        events,
    })
}
