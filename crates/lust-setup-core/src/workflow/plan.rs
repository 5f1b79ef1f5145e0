//! Diff-then-apply planner. A plan is the ordered list of corrective steps
//! that takes the observed HostState to the target state; steps already
//! satisfied are omitted, the rest are idempotent correctors. Plans are
//! computed fresh per run and discarded afterwards.

use super::{event, lifecycle, units, WorkflowEvent, WorkflowLevel};
use crate::config::TargetSpec;
use crate::error::{SetupError, SetupResult};
use crate::provider::{IdentityProvider, Owner, ServiceManager};
use crate::stage::{self, FileOutcome};
use crate::state::HostState;
use log::info;
use serde::Serialize;
use std::fs;

const DIR_MODE: u32 = 0o755;
const CONFIG_DIR_MODE: u32 = 0o750;
const BINARY_MODE: u32 = 0o755;
const CONFIG_MODE: u32 = 0o640;

/// What a single plan step does when executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepAction {
    EnsureInstallRoot,
    EnsureConfigRoot,
    StageBinary,
    StageConfig { force: bool },
    EnsureAccount,
    ApplyOwnership,
    LinkBinary,
    InstallUnit,
    ReloadCatalog,
    EnableUnit,
    StartUnit,
    StopUnit,
    DisableUnit,
    RemoveUnit,
    UnlinkBinary,
    RemoveInstallRoot,
    RemoveConfigRoot,
    RemoveAccount,
}

/// Ordered, idempotent step in a provisioning plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanStep {
    pub action: StepAction,
    pub title: String,
}

/// The corrective steps for one run, in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionPlan {
    pub operation: &'static str,
    pub steps: Vec<PlanStep>,
}

impl ProvisionPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn step(action: StepAction, title: impl Into<String>) -> PlanStep {
    PlanStep {
        action,
        title: title.into(),
    }
}

/// Compute the steps that drive `state` to installed-and-running.
///
/// The filesystem stager runs first, then the identity manager, then the
/// unit registrar, then the lifecycle controller; later steps have hard
/// ordering dependencies on earlier ones. The catalog reload is scheduled
/// whenever the unit definition will be written or a lifecycle action is
/// planned, and always lands before enable/start.
pub fn install_plan(
    state: &HostState,
    spec: &TargetSpec,
    force_config: bool,
) -> SetupResult<ProvisionPlan> {
    let unit = spec.unit_name();
    let account = spec.account();
    let mut steps = Vec::new();

    steps.push(step(
        StepAction::EnsureInstallRoot,
        format!("Ensure install root {}", spec.paths.install_root.display()),
    ));
    steps.push(step(
        StepAction::EnsureConfigRoot,
        format!("Ensure config root {}", spec.paths.config_root.display()),
    ));
    steps.push(step(
        StepAction::StageBinary,
        format!("Stage binary at {}", spec.binary_dest().display()),
    ));
    steps.push(step(
        StepAction::StageConfig {
            force: force_config,
        },
        format!("Stage config at {}", spec.config_dest().display()),
    ));

    if !state.account_exists {
        steps.push(step(
            StepAction::EnsureAccount,
            format!("Create service account {account}"),
        ));
    }
    steps.push(step(
        StepAction::ApplyOwnership,
        format!("Apply {account}:{account} ownership to managed roots"),
    ));
    steps.push(step(
        StepAction::LinkBinary,
        format!("Link {}", spec.link_dest().display()),
    ));

    let content = units::unit_content(spec)?;
    let unit_write = units::needs_install(spec, &content)?;
    if unit_write {
        steps.push(step(
            StepAction::InstallUnit,
            format!("Install unit definition {}", spec.unit_dest().display()),
        ));
    }

    let enable = !state.unit_enabled;
    let start = !state.unit_active;
    if unit_write || enable || start {
        steps.push(step(
            StepAction::ReloadCatalog,
            "Reload service manager catalog",
        ));
    }
    if enable {
        steps.push(step(StepAction::EnableUnit, format!("Enable {unit}")));
    }
    if start {
        steps.push(step(StepAction::StartUnit, format!("Start {unit}")));
    }

    Ok(ProvisionPlan {
        operation: "install",
        steps,
    })
}

/// Compute the steps that drive `state` to fully-absent.
///
/// Strict ordering: stop before disable (disabling an active unit would
/// leave it running until next boot), unit removal before the reload that
/// retires it from the catalog, account removal last, once nothing it owns
/// remains. A catalog sync runs before any lifecycle action so stop/disable
/// never act on a stale catalog.
pub fn uninstall_plan(state: &HostState, spec: &TargetSpec) -> SetupResult<ProvisionPlan> {
    let unit = spec.unit_name();
    let account = spec.account();
    let mut steps = Vec::new();

    if state.unit_active || state.unit_enabled {
        steps.push(step(
            StepAction::ReloadCatalog,
            "Sync service manager catalog",
        ));
    }
    if state.unit_active {
        steps.push(step(StepAction::StopUnit, format!("Stop {unit}")));
    }
    if state.unit_enabled {
        steps.push(step(StepAction::DisableUnit, format!("Disable {unit}")));
    }
    if state.unit_file_present {
        steps.push(step(
            StepAction::RemoveUnit,
            format!("Remove unit definition {}", spec.unit_dest().display()),
        ));
        steps.push(step(
            StepAction::ReloadCatalog,
            "Reload service manager catalog",
        ));
    }
    if state.link_present {
        steps.push(step(
            StepAction::UnlinkBinary,
            format!("Remove link {}", spec.link_dest().display()),
        ));
    }
    if dir_present(&spec.paths.install_root) {
        steps.push(step(
            StepAction::RemoveInstallRoot,
            format!("Remove install root {}", spec.paths.install_root.display()),
        ));
    }
    if dir_present(&spec.paths.config_root) {
        steps.push(step(
            StepAction::RemoveConfigRoot,
            format!("Remove config root {}", spec.paths.config_root.display()),
        ));
    }
    if state.account_exists {
        steps.push(step(
            StepAction::RemoveAccount,
            format!("Remove service account {account}"),
        ));
    }

    Ok(ProvisionPlan {
        operation: "uninstall",
        steps,
    })
}

fn dir_present(path: &std::path::Path) -> bool {
    fs::symlink_metadata(path).map_or(false, |meta| meta.is_dir())
}

/// Execute the plan in order, aborting on the first failure. No rollback:
/// every step is independently idempotent and safe to leave applied, so
/// re-running the operation resumes from the failure point.
pub(crate) fn execute<M, I>(
    plan: &ProvisionPlan,
    spec: &TargetSpec,
    manager: &M,
    identity: &I,
    events: &mut Vec<WorkflowEvent>,
) -> SetupResult<()>
where
    M: ServiceManager<Error = SetupError>,
    I: IdentityProvider<Error = SetupError>,
{
    let account = spec.account();
    let mut owner: Option<Owner> = if identity.exists(account)? {
        Some(identity.resolve(account)?)
    } else {
        None
    };

    for plan_step in &plan.steps {
        let outcome = run_step(plan_step, spec, manager, identity, &mut owner)
            .map_err(|err| err.in_step(&plan_step.title))?;
        info!("{}", outcome.message);
        events.push(event(outcome.level, outcome.message));
    }
    Ok(())
}

struct StepOutcome {
    level: WorkflowLevel,
    message: String,
}

fn changed(message: String) -> SetupResult<StepOutcome> {
    Ok(StepOutcome {
        level: WorkflowLevel::Success,
        message,
    })
}

fn unchanged(message: String) -> SetupResult<StepOutcome> {
    Ok(StepOutcome {
        level: WorkflowLevel::Info,
        message,
    })
}

fn run_step<M, I>(
    plan_step: &PlanStep,
    spec: &TargetSpec,
    manager: &M,
    identity: &I,
    owner: &mut Option<Owner>,
) -> SetupResult<StepOutcome>
where
    M: ServiceManager<Error = SetupError>,
    I: IdentityProvider<Error = SetupError>,
{
    let unit = spec.unit_name();
    match plan_step.action {
        StepAction::EnsureInstallRoot => {
            let path = &spec.paths.install_root;
            if stage::ensure_directory(path, *owner, DIR_MODE)? {
                changed(format!("Created install root {}", path.display()))
            } else {
                unchanged(format!("Install root {} already in place", path.display()))
            }
        }
        StepAction::EnsureConfigRoot => {
            let path = &spec.paths.config_root;
            if stage::ensure_directory(path, *owner, CONFIG_DIR_MODE)? {
                changed(format!("Created config root {}", path.display()))
            } else {
                unchanged(format!("Config root {} already in place", path.display()))
            }
        }
        StepAction::StageBinary => {
            let dest = spec.binary_dest();
            match stage::ensure_file(&dest, &spec.artifacts.binary, *owner, BINARY_MODE, true)? {
                FileOutcome::Written => changed(format!("Staged binary at {}", dest.display())),
                _ => unchanged(format!("Binary at {} already current", dest.display())),
            }
        }
        StepAction::StageConfig { force } => {
            let dest = spec.config_dest();
            match stage::ensure_file(
                &dest,
                &spec.artifacts.config_template,
                *owner,
                CONFIG_MODE,
                force,
            )? {
                FileOutcome::Written => changed(format!("Staged config at {}", dest.display())),
                FileOutcome::Preserved => unchanged(format!(
                    "Preserved existing config at {}",
                    dest.display()
                )),
                FileOutcome::Unchanged => {
                    unchanged(format!("Config at {} already current", dest.display()))
                }
            }
        }
        StepAction::EnsureAccount => {
            let account = spec.account();
            let created = identity.ensure(account)?;
            *owner = Some(identity.resolve(account)?);
            if created {
                changed(format!("Created system account {account}"))
            } else {
                unchanged(format!("System account {account} already present"))
            }
        }
        StepAction::ApplyOwnership => {
            let account = spec.account();
            let resolved = match *owner {
                Some(resolved) => resolved,
                None => {
                    let resolved = identity.resolve(account)?;
                    *owner = Some(resolved);
                    resolved
                }
            };
            stage::ensure_directory(&spec.paths.install_root, Some(resolved), DIR_MODE)?;
            stage::ensure_file(
                &spec.binary_dest(),
                &spec.artifacts.binary,
                Some(resolved),
                BINARY_MODE,
                false,
            )?;
            stage::ensure_directory(&spec.paths.config_root, Some(resolved), CONFIG_DIR_MODE)?;
            stage::ensure_file(
                &spec.config_dest(),
                &spec.artifacts.config_template,
                Some(resolved),
                CONFIG_MODE,
                false,
            )?;
            unchanged(format!("Ownership {account}:{account} verified on managed roots"))
        }
        StepAction::LinkBinary => {
            let link = spec.link_dest();
            stage::ensure_directory(&spec.paths.bin_dir, None, DIR_MODE)?;
            if stage::ensure_symlink(&spec.binary_dest(), &link)? {
                changed(format!(
                    "Linked {} -> {}",
                    link.display(),
                    spec.binary_dest().display()
                ))
            } else {
                unchanged(format!("Link {} already in place", link.display()))
            }
        }
        StepAction::InstallUnit => {
            let content = units::unit_content(spec)?;
            match units::install_unit(spec, &content)? {
                FileOutcome::Written => changed(format!(
                    "Installed unit definition {}",
                    spec.unit_dest().display()
                )),
                _ => unchanged(format!(
                    "Unit definition {} already current",
                    spec.unit_dest().display()
                )),
            }
        }
        StepAction::ReloadCatalog => {
            units::reload_catalog(manager)?;
            changed("Service manager catalog reloaded".to_string())
        }
        StepAction::EnableUnit => {
            lifecycle::set_enabled(manager, &unit, true)?;
            changed(format!("Enabled {unit}"))
        }
        StepAction::StartUnit => {
            lifecycle::set_active(manager, &unit, true)?;
            changed(format!("Started {unit}"))
        }
        StepAction::StopUnit => {
            lifecycle::set_active(manager, &unit, false)?;
            changed(format!("Stopped {unit}"))
        }
        StepAction::DisableUnit => {
            lifecycle::set_enabled(manager, &unit, false)?;
            changed(format!("Disabled {unit}"))
        }
        StepAction::RemoveUnit => {
            if units::remove_unit(spec)? {
                changed(format!(
                    "Removed unit definition {}",
                    spec.unit_dest().display()
                ))
            } else {
                unchanged(format!(
                    "Unit definition {} already absent",
                    spec.unit_dest().display()
                ))
            }
        }
        StepAction::UnlinkBinary => {
            let link = spec.link_dest();
            if stage::remove_symlink(&link, &spec.binary_dest())? {
                changed(format!("Removed link {}", link.display()))
            } else {
                unchanged(format!("Link {} not ours or already absent", link.display()))
            }
        }
        StepAction::RemoveInstallRoot => {
            let path = &spec.paths.install_root;
            if stage::remove_directory(path)? {
                changed(format!("Removed install root {}", path.display()))
            } else {
                unchanged(format!("Install root {} already absent", path.display()))
            }
        }
        StepAction::RemoveConfigRoot => {
            let path = &spec.paths.config_root;
            if stage::remove_directory(path)? {
                changed(format!("Removed config root {}", path.display()))
            } else {
                unchanged(format!("Config root {} already absent", path.display()))
            }
        }
        StepAction::RemoveAccount => {
            let account = spec.account();
            if identity.remove(account, &spec.managed_roots())? {
                changed(format!("Removed service account {account}"))
            } else {
                unchanged(format!("Service account {account} already absent"))
            }
        }
    }
}
