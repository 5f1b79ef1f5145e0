//! Lifecycle controller: drives enable/disable/start/stop through the
//! service manager and verifies every transition by re-querying state.

use crate::error::{SetupError, SetupResult};
use crate::provider::{ServiceManager, UnitState};
use log::debug;

pub fn query_state<M>(manager: &M, unit: &str) -> SetupResult<UnitState>
where
    M: ServiceManager<Error = SetupError>,
{
    manager.status(unit)
}

/// Bring the unit's enablement to `enabled`, verifying the result. A
/// command that "succeeds" without changing state is surfaced as
/// `LifecycleTransitionFailed` with the observed state attached.
pub fn set_enabled<M>(manager: &M, unit: &str, enabled: bool) -> SetupResult<()>
where
    M: ServiceManager<Error = SetupError>,
{
    let current = manager.status(unit)?;
    if current.enabled == enabled {
        debug!("{unit} already {}", flag(enabled, "enabled", "disabled"));
        return Ok(());
    }
    if enabled {
        manager.enable(unit)?;
    } else {
        manager.disable(unit)?;
    }
    let observed = manager.status(unit)?;
    if observed.enabled != enabled {
        return Err(SetupError::LifecycleTransitionFailed {
            unit: unit.to_string(),
            expected: flag(enabled, "enabled", "disabled").to_string(),
            observed: observed.to_string(),
        });
    }
    Ok(())
}

/// Bring the unit's activity to `active`, verifying the result.
pub fn set_active<M>(manager: &M, unit: &str, active: bool) -> SetupResult<()>
where
    M: ServiceManager<Error = SetupError>,
{
    let current = manager.status(unit)?;
    if current.active == active {
        debug!("{unit} already {}", flag(active, "active", "inactive"));
        return Ok(());
    }
    if active {
        manager.start(unit)?;
    } else {
        manager.stop(unit)?;
    }
    let observed = manager.status(unit)?;
    if observed.active != active {
        return Err(SetupError::LifecycleTransitionFailed {
            unit: unit.to_string(),
            expected: flag(active, "active", "inactive").to_string(),
            observed: observed.to_string(),
        });
    }
    Ok(())
}

fn flag(value: bool, yes: &'static str, no: &'static str) -> &'static str {
    if value {
        yes
    } else {
        no
    }
}
