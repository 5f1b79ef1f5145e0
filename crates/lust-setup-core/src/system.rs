//! Host-backed implementations of the collaborator traits: systemctl for
//! the service manager, the shadow utilities for the identity provider.

use crate::error::{SetupError, SetupResult};
use crate::provider::{IdentityProvider, Owner, ServiceManager, UnitState};
use crate::workflow::privilege::run_external;
use log::{debug, warn};
use std::env;
use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

const SYSTEMCTL_PATH_ENV: &str = "LUST_SETUP_SYSTEMCTL";
const SYSTEMCTL_CANDIDATES: &[&str] = &["/bin/systemctl", "/usr/bin/systemctl"];
const GETENT_CANDIDATES: &[&str] = &["/usr/bin/getent", "/bin/getent"];
const USERADD_CANDIDATES: &[&str] = &["/usr/sbin/useradd", "/sbin/useradd"];
const GROUPADD_CANDIDATES: &[&str] = &["/usr/sbin/groupadd", "/sbin/groupadd"];
const USERDEL_CANDIDATES: &[&str] = &["/usr/sbin/userdel", "/sbin/userdel"];
const GROUPDEL_CANDIDATES: &[&str] = &["/usr/sbin/groupdel", "/sbin/groupdel"];
const NOLOGIN_CANDIDATES: &[&str] = &["/usr/sbin/nologin", "/sbin/nologin", "/bin/false"];

/// Well-known roots probed for stray files before an account is removed.
const OWNERSHIP_PROBE_ROOTS: &[&str] = &["/etc", "/opt", "/srv", "/var/lib", "/var/log"];
const OWNERSHIP_PROBE_DEPTH: usize = 3;

/// Service manager backed by `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemdManager {
    systemctl: PathBuf,
}

impl SystemdManager {
    /// Locate systemctl, honoring the `LUST_SETUP_SYSTEMCTL` override.
    pub fn discover() -> SetupResult<Self> {
        if let Some(explicit) = env::var_os(SYSTEMCTL_PATH_ENV) {
            return Ok(Self {
                systemctl: PathBuf::from(explicit),
            });
        }
        for candidate in SYSTEMCTL_CANDIDATES {
            if Path::new(candidate).exists() {
                return Ok(Self {
                    systemctl: PathBuf::from(candidate),
                });
            }
        }
        Err(SetupError::Command(
            "systemctl not found; this host does not look systemd-managed".into(),
        ))
    }

    fn run(&self, args: &[&str]) -> SetupResult<crate::workflow::privilege::CommandOutput> {
        let candidate = self.systemctl.to_string_lossy().into_owned();
        let os_args: Vec<OsString> = args.iter().map(OsString::from).collect();
        run_external(&[candidate.as_str()], &os_args)
    }

    /// Issue a lifecycle verb without judging the outcome; effectiveness is
    /// verified by the lifecycle controller re-querying state afterwards.
    fn lifecycle_verb(&self, verb: &str, unit: &str) -> SetupResult<()> {
        let output = self.run(&[verb, unit])?;
        if !output.status.success() {
            warn!(
                "systemctl {verb} {unit} exited {:?}: {}",
                output.status.code(),
                output.stderr_text()
            );
        }
        Ok(())
    }
}

impl ServiceManager for SystemdManager {
    type Error = SetupError;

    fn reload_catalog(&self) -> SetupResult<()> {
        let output = self.run(&["daemon-reload"])?;
        if output.status.success() {
            debug!("systemd unit catalog reloaded");
            Ok(())
        } else {
            Err(SetupError::ManagerReloadFailed(output.stderr_text()))
        }
    }

    fn enable(&self, unit: &str) -> SetupResult<()> {
        self.lifecycle_verb("enable", unit)
    }

    fn disable(&self, unit: &str) -> SetupResult<()> {
        self.lifecycle_verb("disable", unit)
    }

    fn start(&self, unit: &str) -> SetupResult<()> {
        self.lifecycle_verb("start", unit)
    }

    fn stop(&self, unit: &str) -> SetupResult<()> {
        self.lifecycle_verb("stop", unit)
    }

    fn status(&self, unit: &str) -> SetupResult<UnitState> {
        // Both probes exit non-zero for unknown or inert units; that reads
        // as disabled/inactive rather than an error.
        let enabled = self
            .run(&["is-enabled", unit])
            .map(|out| matches!(out.stdout_text().as_str(), "enabled" | "enabled-runtime"))?;
        let active = self
            .run(&["is-active", unit])
            .map(|out| out.stdout_text() == "active")?;
        Ok(UnitState { enabled, active })
    }
}

/// Identity provider backed by getent and the shadow utilities.
#[derive(Debug, Clone, Default)]
pub struct SystemIdentity;

impl SystemIdentity {
    fn passwd_entry(&self, name: &str) -> SetupResult<Option<String>> {
        let output = run_external(
            GETENT_CANDIDATES,
            &[OsString::from("passwd"), OsString::from(name)],
        )?;
        if output.status.success() {
            Ok(Some(output.stdout_text()))
        } else {
            Ok(None)
        }
    }

    fn group_exists(&self, name: &str) -> SetupResult<bool> {
        let output = run_external(
            GETENT_CANDIDATES,
            &[OsString::from("group"), OsString::from(name)],
        )?;
        Ok(output.status.success())
    }
}

impl IdentityProvider for SystemIdentity {
    type Error = SetupError;

    fn exists(&self, name: &str) -> SetupResult<bool> {
        Ok(self.passwd_entry(name)?.is_some())
    }

    fn ensure(&self, name: &str) -> SetupResult<bool> {
        if self.exists(name)? {
            debug!("service account {name} already present");
            return Ok(false);
        }

        if !self.group_exists(name)? {
            let output = run_external(
                GROUPADD_CANDIDATES,
                &[OsString::from("--system"), OsString::from(name)],
            )?;
            if !output.status.success() {
                return Err(SetupError::Command(format!(
                    "groupadd --system {name} failed: {}",
                    output.stderr_text()
                )));
            }
        }

        let shell = NOLOGIN_CANDIDATES
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/usr/sbin/nologin".to_string());
        let output = run_external(
            USERADD_CANDIDATES,
            &[
                OsString::from("--system"),
                OsString::from("--no-create-home"),
                OsString::from("--shell"),
                OsString::from(shell),
                OsString::from("--gid"),
                OsString::from(name),
                OsString::from(name),
            ],
        )?;
        if !output.status.success() {
            return Err(SetupError::Command(format!(
                "useradd --system {name} failed: {}",
                output.stderr_text()
            )));
        }
        Ok(true)
    }

    fn resolve(&self, name: &str) -> SetupResult<Owner> {
        let entry = self.passwd_entry(name)?.ok_or_else(|| {
            SetupError::Command(format!("account {name} not present in passwd database"))
        })?;
        let mut fields = entry.split(':');
        let uid = fields.nth(2).and_then(|f| f.parse().ok());
        let gid = fields.next().and_then(|f| f.parse().ok());
        match (uid, gid) {
            (Some(uid), Some(gid)) => Ok(Owner { uid, gid }),
            _ => Err(SetupError::Command(format!(
                "unparseable passwd entry for {name}: {entry}"
            ))),
        }
    }

    fn remove(&self, name: &str, exempt: &[PathBuf]) -> SetupResult<bool> {
        if !self.exists(name)? {
            debug!("service account {name} already absent");
            return Ok(false);
        }

        let owner = self.resolve(name)?;
        let roots: Vec<PathBuf> = OWNERSHIP_PROBE_ROOTS.iter().map(PathBuf::from).collect();
        let stray = owned_paths_outside(owner.uid, &roots, exempt, OWNERSHIP_PROBE_DEPTH)?;
        if !stray.is_empty() {
            return Err(SetupError::AccountInUse {
                account: name.to_string(),
                paths: stray,
            });
        }

        let output = run_external(USERDEL_CANDIDATES, &[OsString::from(name)])?;
        if !output.status.success() {
            return Err(SetupError::Command(format!(
                "userdel {name} failed: {}",
                output.stderr_text()
            )));
        }

        // The group usually goes with the user; a leftover shared group is
        // not worth failing the decommission over.
        if self.group_exists(name)? {
            let output = run_external(GROUPDEL_CANDIDATES, &[OsString::from(name)])?;
            if !output.status.success() {
                warn!("groupdel {name} failed: {}", output.stderr_text());
            }
        }
        Ok(true)
    }
}

/// Bounded-depth walk of `roots` collecting paths owned by `uid` that do not
/// live under any `exempt` prefix. Unreadable entries are skipped.
pub(crate) fn owned_paths_outside(
    uid: u32,
    roots: &[PathBuf],
    exempt: &[PathBuf],
    max_depth: usize,
) -> SetupResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    for root in roots {
        walk_owned(uid, root, exempt, max_depth, &mut found);
    }
    found.sort();
    found.dedup();
    Ok(found)
}

fn walk_owned(uid: u32, path: &Path, exempt: &[PathBuf], depth: usize, out: &mut Vec<PathBuf>) {
    if exempt.iter().any(|prefix| path.starts_with(prefix)) {
        return;
    }
    let Ok(meta) = fs::symlink_metadata(path) else {
        return;
    };
    if meta.uid() == uid {
        out.push(path.to_path_buf());
        return;
    }
    if depth == 0 || !meta.is_dir() {
        return;
    }
    let Ok(entries) = fs::read_dir(path) else {
        return;
    };
    for entry in entries.flatten() {
        walk_owned(uid, &entry.path(), exempt, depth - 1, out);
    }
}
