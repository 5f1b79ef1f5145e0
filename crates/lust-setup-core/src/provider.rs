//! Collaborator traits: the service manager and the identity subsystem are
//! reached only through these seams so workflows stay testable.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Enabled/active snapshot for one unit, as reported by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnitState {
    pub enabled: bool,
    pub active: bool,
}

impl UnitState {
    pub const ABSENT: UnitState = UnitState {
        enabled: false,
        active: false,
    };
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}+{}",
            if self.enabled { "enabled" } else { "disabled" },
            if self.active { "active" } else { "inactive" }
        )
    }
}

/// Narrow interface onto the OS service manager. Operations are synchronous
/// and idempotent at the collaborator's level (stopping a stopped unit
/// succeeds); querying an unknown unit reports disabled+inactive.
pub trait ServiceManager {
    type Error;

    fn reload_catalog(&self) -> Result<(), Self::Error>;
    fn enable(&self, unit: &str) -> Result<(), Self::Error>;
    fn disable(&self, unit: &str) -> Result<(), Self::Error>;
    fn start(&self, unit: &str) -> Result<(), Self::Error>;
    fn stop(&self, unit: &str) -> Result<(), Self::Error>;
    fn status(&self, unit: &str) -> Result<UnitState, Self::Error>;
}

/// Numeric identity of the service account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

/// Narrow interface onto the host's account database.
pub trait IdentityProvider {
    type Error;

    fn exists(&self, name: &str) -> Result<bool, Self::Error>;

    /// Create the system account/group pair if absent; returns whether
    /// anything was created.
    fn ensure(&self, name: &str) -> Result<bool, Self::Error>;

    fn resolve(&self, name: &str) -> Result<Owner, Self::Error>;

    /// Remove the account/group pair if present; returns whether anything
    /// was removed. `exempt` lists the managed roots the account is allowed
    /// to own; ownership elsewhere must refuse the removal.
    fn remove(&self, name: &str, exempt: &[PathBuf]) -> Result<bool, Self::Error>;
}
