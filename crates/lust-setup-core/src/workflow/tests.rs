use super::*;
use crate::config::{Artifacts, Layout, Service, TargetSpec};
use crate::error::{SetupError, SetupResult};
use crate::provider::{IdentityProvider, Owner, ServiceManager, UnitState};
use crate::state::observe;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

#[derive(Default)]
struct MockManagerState {
    calls: Vec<String>,
    enabled: bool,
    active: bool,
    ignore_start: bool,
    fail_reload: bool,
}

/// Service manager double that records every action verb in order.
#[derive(Clone, Default)]
struct MockManager {
    inner: Arc<Mutex<MockManagerState>>,
}

impl MockManager {
    fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    fn set_ignore_start(&self, value: bool) {
        self.inner.lock().unwrap().ignore_start = value;
    }

    fn set_fail_reload(&self, value: bool) {
        self.inner.lock().unwrap().fail_reload = value;
    }
}

impl ServiceManager for MockManager {
    type Error = SetupError;

    fn reload_catalog(&self) -> SetupResult<()> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push("reload".into());
        if state.fail_reload {
            return Err(SetupError::ManagerReloadFailed("injected".into()));
        }
        Ok(())
    }

    fn enable(&self, _unit: &str) -> SetupResult<()> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push("enable".into());
        state.enabled = true;
        Ok(())
    }

    fn disable(&self, _unit: &str) -> SetupResult<()> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push("disable".into());
        state.enabled = false;
        Ok(())
    }

    fn start(&self, _unit: &str) -> SetupResult<()> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push("start".into());
        if !state.ignore_start {
            state.active = true;
        }
        Ok(())
    }

    fn stop(&self, _unit: &str) -> SetupResult<()> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push("stop".into());
        state.active = false;
        Ok(())
    }

    fn status(&self, _unit: &str) -> SetupResult<UnitState> {
        let state = self.inner.lock().unwrap();
        Ok(UnitState {
            enabled: state.enabled,
            active: state.active,
        })
    }
}

#[derive(Default)]
struct MockIdentityState {
    accounts: HashSet<String>,
    stray_paths: Vec<PathBuf>,
}

/// Identity double resolving every account to the current process identity
/// so ownership corrections are no-ops under the test runner.
#[derive(Clone, Default)]
struct MockIdentity {
    inner: Arc<Mutex<MockIdentityState>>,
}

impl MockIdentity {
    fn has_account(&self, name: &str) -> bool {
        self.inner.lock().unwrap().accounts.contains(name)
    }

    fn set_stray_paths(&self, paths: Vec<PathBuf>) {
        self.inner.lock().unwrap().stray_paths = paths;
    }
}

impl IdentityProvider for MockIdentity {
    type Error = SetupError;

    fn exists(&self, name: &str) -> SetupResult<bool> {
        Ok(self.inner.lock().unwrap().accounts.contains(name))
    }

    fn ensure(&self, name: &str) -> SetupResult<bool> {
        Ok(self.inner.lock().unwrap().accounts.insert(name.to_string()))
    }

    fn resolve(&self, _name: &str) -> SetupResult<Owner> {
        Ok(Owner {
            uid: unsafe { libc::geteuid() },
            gid: unsafe { libc::getegid() },
        })
    }

    fn remove(&self, name: &str, exempt: &[PathBuf]) -> SetupResult<bool> {
        let mut state = self.inner.lock().unwrap();
        let stray: Vec<PathBuf> = state
            .stray_paths
            .iter()
            .filter(|path| !exempt.iter().any(|prefix| path.starts_with(prefix)))
            .cloned()
            .collect();
        if !stray.is_empty() {
            return Err(SetupError::AccountInUse {
                account: name.to_string(),
                paths: stray,
            });
        }
        Ok(state.accounts.remove(name))
    }
}

fn sample_spec(root: &Path) -> TargetSpec {
    let binary_src = root.join("artifacts/lust");
    let config_src = root.join("artifacts/config.yaml");
    fs::create_dir_all(root.join("artifacts")).unwrap();
    fs::write(&binary_src, b"\x7fELF lust daemon").unwrap();
    fs::write(&config_src, b"port: 8080\n").unwrap();

    TargetSpec {
        service: Service {
            name: "lust".into(),
            account: None,
        },
        paths: Layout {
            install_root: root.join("opt/lust"),
            config_root: root.join("etc/lust"),
            bin_dir: root.join("usr/local/bin"),
            unit_dir: root.join("etc/systemd/system"),
        },
        artifacts: Artifacts {
            binary: binary_src,
            config_template: config_src,
            unit_template: None,
        },
    }
}

fn unwrap_step(err: SetupError) -> (String, SetupError) {
    match err {
        SetupError::Step { step, source } => (step, *source),
        other => panic!("expected a step-wrapped error, got {other}"),
    }
}

#[test]
fn fresh_install_reaches_enabled_active_with_expected_layout() {
    let dir = tempdir().unwrap();
    let spec = sample_spec(dir.path());
    let manager = MockManager::default();
    let identity = MockIdentity::default();

    let report = install(&spec, &manager, &identity, InstallOptions::default()).unwrap();
    assert_eq!(report.title, "Provisioned lust.service");

    let state = observe(&spec, &manager, &identity).unwrap();
    assert!(state.binary_present);
    assert!(state.config_present);
    assert!(state.link_present);
    assert!(state.unit_file_present);
    assert!(state.account_exists);
    assert!(state.unit_enabled);
    assert!(state.unit_active);

    assert_eq!(fs::read(spec.config_dest()).unwrap(), b"port: 8080\n");
    assert_eq!(
        fs::read_link(spec.link_dest()).unwrap(),
        spec.binary_dest()
    );
    let unit = fs::read_to_string(spec.unit_dest()).unwrap();
    assert!(unit.contains("User=lust"));
    assert!(unit.contains(&format!("ExecStart={}", spec.link_dest().display())));
    assert!(identity.has_account("lust"));
}

#[test]
fn second_install_run_changes_nothing() {
    let dir = tempdir().unwrap();
    let spec = sample_spec(dir.path());
    let manager = MockManager::default();
    let identity = MockIdentity::default();

    install(&spec, &manager, &identity, InstallOptions::default()).unwrap();
    let first_state = observe(&spec, &manager, &identity).unwrap();
    let unit_digest = crate::stage::file_digest(&spec.unit_dest()).unwrap();
    manager.clear_calls();

    let report = install(&spec, &manager, &identity, InstallOptions::default()).unwrap();

    // Nothing left to correct: every event is informational and the manager
    // receives no commands at all.
    assert!(report
        .events
        .iter()
        .all(|event| event.level == WorkflowLevel::Info));
    assert!(manager.calls().is_empty());
    assert_eq!(observe(&spec, &manager, &identity).unwrap(), first_state);
    assert_eq!(
        crate::stage::file_digest(&spec.unit_dest()).unwrap(),
        unit_digest
    );
}

#[test]
fn edited_config_survives_reinstall_unless_forced() {
    let dir = tempdir().unwrap();
    let spec = sample_spec(dir.path());
    let manager = MockManager::default();
    let identity = MockIdentity::default();

    install(&spec, &manager, &identity, InstallOptions::default()).unwrap();
    fs::write(spec.config_dest(), b"port: 9090\n").unwrap();

    install(&spec, &manager, &identity, InstallOptions::default()).unwrap();
    assert_eq!(fs::read(spec.config_dest()).unwrap(), b"port: 9090\n");

    install(
        &spec,
        &manager,
        &identity,
        InstallOptions { force_config: true },
    )
    .unwrap();
    assert_eq!(fs::read(spec.config_dest()).unwrap(), b"port: 8080\n");
}

#[test]
fn uninstall_returns_host_to_pre_install_state() {
    let dir = tempdir().unwrap();
    let spec = sample_spec(dir.path());
    let manager = MockManager::default();
    let identity = MockIdentity::default();

    let before = observe(&spec, &manager, &identity).unwrap();
    assert!(before.is_absent());

    install(&spec, &manager, &identity, InstallOptions::default()).unwrap();
    let report = uninstall(&spec, &manager, &identity).unwrap();
    assert_eq!(report.title, "Decommissioned lust.service");

    let after = observe(&spec, &manager, &identity).unwrap();
    assert!(after.is_absent());
    assert_eq!(after, before);
    assert!(!spec.paths.install_root.exists());
    assert!(!spec.paths.config_root.exists());
    assert!(fs::symlink_metadata(spec.link_dest()).is_err());
    assert!(!identity.has_account("lust"));
}

#[test]
fn uninstall_on_clean_host_is_a_noop() {
    let dir = tempdir().unwrap();
    let spec = sample_spec(dir.path());
    let manager = MockManager::default();
    let identity = MockIdentity::default();

    let report = uninstall(&spec, &manager, &identity).unwrap();
    assert!(manager.calls().is_empty());
    assert!(report
        .events
        .iter()
        .any(|event| event.message.contains("nothing to remove")));
}

#[test]
fn catalog_reload_precedes_lifecycle_actions_in_both_directions() {
    let dir = tempdir().unwrap();
    let spec = sample_spec(dir.path());
    let manager = MockManager::default();
    let identity = MockIdentity::default();

    install(&spec, &manager, &identity, InstallOptions::default()).unwrap();
    let calls = manager.calls();
    let reload = calls.iter().position(|c| c == "reload").unwrap();
    let enable = calls.iter().position(|c| c == "enable").unwrap();
    let start = calls.iter().position(|c| c == "start").unwrap();
    assert!(reload < enable);
    assert!(reload < start);
    assert!(enable < start);

    manager.clear_calls();
    uninstall(&spec, &manager, &identity).unwrap();
    let calls = manager.calls();
    let stop = calls.iter().position(|c| c == "stop").unwrap();
    let disable = calls.iter().position(|c| c == "disable").unwrap();
    let first_reload = calls.iter().position(|c| c == "reload").unwrap();
    let last_reload = calls.iter().rposition(|c| c == "reload").unwrap();
    assert!(first_reload < stop, "catalog must be synced before stopping");
    assert!(stop < disable, "stop must precede disable");
    assert!(
        disable < last_reload,
        "unit removal must be followed by a reload"
    );
}

#[test]
fn missing_binary_source_aborts_and_rerun_resumes() {
    let dir = tempdir().unwrap();
    let spec = sample_spec(dir.path());
    let manager = MockManager::default();
    let identity = MockIdentity::default();

    fs::remove_file(&spec.artifacts.binary).unwrap();
    let err = install(&spec, &manager, &identity, InstallOptions::default()).unwrap_err();
    let (step, source) = unwrap_step(err);
    assert!(step.contains("Stage binary"));
    assert!(matches!(source, SetupError::SourceNotFound(_)));

    // Earlier steps stayed applied, later ones never ran.
    assert!(spec.paths.install_root.is_dir());
    assert!(!spec.unit_dest().exists());
    assert!(manager.calls().is_empty());

    // Fixing the cause and re-running converges on the same end state as an
    // uninterrupted run.
    fs::write(&spec.artifacts.binary, b"\x7fELF lust daemon").unwrap();
    install(&spec, &manager, &identity, InstallOptions::default()).unwrap();
    let state = observe(&spec, &manager, &identity).unwrap();
    assert!(state.unit_enabled && state.unit_active && state.binary_present);
}

#[test]
fn ineffective_start_surfaces_observed_state() {
    let dir = tempdir().unwrap();
    let spec = sample_spec(dir.path());
    let manager = MockManager::default();
    let identity = MockIdentity::default();

    manager.set_ignore_start(true);
    let err = install(&spec, &manager, &identity, InstallOptions::default()).unwrap_err();
    let (_, source) = unwrap_step(err);
    match source {
        SetupError::LifecycleTransitionFailed {
            unit,
            expected,
            observed,
        } => {
            assert_eq!(unit, "lust.service");
            assert_eq!(expected, "active");
            assert_eq!(observed, "enabled+inactive");
        }
        other => panic!("expected a lifecycle failure, got {other}"),
    }

    // Once the unit can start, re-running finishes the remaining step.
    manager.set_ignore_start(false);
    install(&spec, &manager, &identity, InstallOptions::default()).unwrap();
    assert!(observe(&spec, &manager, &identity).unwrap().unit_active);
}

#[test]
fn reload_failure_is_fatal_before_any_lifecycle_action() {
    let dir = tempdir().unwrap();
    let spec = sample_spec(dir.path());
    let manager = MockManager::default();
    let identity = MockIdentity::default();

    manager.set_fail_reload(true);
    let err = install(&spec, &manager, &identity, InstallOptions::default()).unwrap_err();
    let (_, source) = unwrap_step(err);
    assert!(matches!(source, SetupError::ManagerReloadFailed(_)));

    let calls = manager.calls();
    assert_eq!(calls, vec!["reload"]);
    // Already-applied staging survives the abort.
    assert!(spec.unit_dest().is_file());
}

#[test]
fn account_owning_foreign_files_blocks_removal() {
    let dir = tempdir().unwrap();
    let spec = sample_spec(dir.path());
    let manager = MockManager::default();
    let identity = MockIdentity::default();

    install(&spec, &manager, &identity, InstallOptions::default()).unwrap();
    identity.set_stray_paths(vec![dir.path().join("srv/shared-cache")]);

    let err = uninstall(&spec, &manager, &identity).unwrap_err();
    let (step, source) = unwrap_step(err);
    assert!(step.contains("Remove service account"));
    assert!(matches!(source, SetupError::AccountInUse { .. }));
    assert!(identity.has_account("lust"));
    // Everything before the account step is already gone.
    assert!(!spec.paths.install_root.exists());

    identity.set_stray_paths(Vec::new());
    uninstall(&spec, &manager, &identity).unwrap();
    assert!(!identity.has_account("lust"));
}

#[test]
fn observation_does_not_infer_one_field_from_another() {
    let dir = tempdir().unwrap();
    let spec = sample_spec(dir.path());
    let manager = MockManager::default();
    let identity = MockIdentity::default();

    // A unit left enabled with every artifact missing must be reported
    // exactly as such.
    manager.enable("lust.service").unwrap();
    let state = observe(&spec, &manager, &identity).unwrap();
    assert!(state.unit_enabled);
    assert!(!state.binary_present);
    assert!(!state.unit_file_present);
    assert!(!state.account_exists);
}

#[test]
fn install_plan_skips_already_satisfied_lifecycle_steps() {
    let dir = tempdir().unwrap();
    let spec = sample_spec(dir.path());
    let manager = MockManager::default();
    let identity = MockIdentity::default();

    install(&spec, &manager, &identity, InstallOptions::default()).unwrap();
    let state = observe(&spec, &manager, &identity).unwrap();
    let plan = install_plan(&state, &spec, false).unwrap();
    assert!(plan.steps.iter().all(|step| !matches!(
        step.action,
        StepAction::InstallUnit
            | StepAction::ReloadCatalog
            | StepAction::EnableUnit
            | StepAction::StartUnit
    )));
}

#[test]
fn uninstall_plan_is_empty_on_an_absent_host() {
    let dir = tempdir().unwrap();
    let spec = sample_spec(dir.path());
    let plan = uninstall_plan(&crate::state::HostState::default_absent(), &spec).unwrap();
    assert!(plan.is_empty());
}

#[test]
fn stopped_but_enabled_unit_is_stopped_then_disabled() {
    let dir = tempdir().unwrap();
    let spec = sample_spec(dir.path());
    let manager = MockManager::default();
    let identity = MockIdentity::default();

    install(&spec, &manager, &identity, InstallOptions::default()).unwrap();
    manager.stop("lust.service").unwrap();
    manager.clear_calls();

    uninstall(&spec, &manager, &identity).unwrap();
    let calls = manager.calls();
    // Stopping is already satisfied and planned away; disable still runs.
    assert!(!calls.contains(&"stop".to_string()));
    assert!(calls.contains(&"disable".to_string()));
}
