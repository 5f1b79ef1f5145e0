//! Live host observation. HostState is derived fresh at the start of every
//! run and never persisted; each field is independently observable and none
//! implies another.

use crate::config::TargetSpec;
use crate::error::{SetupError, SetupResult};
use crate::provider::{IdentityProvider, ServiceManager};
use log::debug;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Snapshot of what currently exists on the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HostState {
    pub binary_present: bool,
    pub config_present: bool,
    pub link_present: bool,
    pub unit_file_present: bool,
    pub account_exists: bool,
    pub unit_enabled: bool,
    pub unit_active: bool,
}

impl HostState {
    /// The canonical all-absent snapshot of a host that never saw the
    /// service.
    pub fn default_absent() -> HostState {
        HostState {
            binary_present: false,
            config_present: false,
            link_present: false,
            unit_file_present: false,
            account_exists: false,
            unit_enabled: false,
            unit_active: false,
        }
    }

    /// True when nothing managed by the spec remains on the host.
    pub fn is_absent(&self) -> bool {
        !(self.binary_present
            || self.config_present
            || self.link_present
            || self.unit_file_present
            || self.account_exists
            || self.unit_enabled
            || self.unit_active)
    }
}

/// Derive the current HostState for `spec` from the filesystem, the account
/// database, and the service manager.
pub fn observe<M, I>(spec: &TargetSpec, manager: &M, identity: &I) -> SetupResult<HostState>
where
    M: ServiceManager<Error = SetupError>,
    I: IdentityProvider<Error = SetupError>,
{
    let unit = spec.unit_name();
    let unit_state = manager.status(&unit)?;
    let state = HostState {
        binary_present: is_file(&spec.binary_dest()),
        config_present: is_file(&spec.config_dest()),
        link_present: is_symlink(&spec.link_dest()),
        unit_file_present: is_file(&spec.unit_dest()),
        account_exists: identity.exists(spec.account())?,
        unit_enabled: unit_state.enabled,
        unit_active: unit_state.active,
    };
    debug!("observed host state for {unit}: {state:?}");
    Ok(state)
}

fn is_file(path: &Path) -> bool {
    fs::symlink_metadata(path).map_or(false, |meta| meta.is_file())
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).map_or(false, |meta| meta.file_type().is_symlink())
}
