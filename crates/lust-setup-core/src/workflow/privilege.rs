//! Entry privilege gate and the candidate-path command runner shared by the
//! system collaborators.

use crate::error::{SetupError, SetupResult};
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;

/// Captured output of an external host command.
#[derive(Debug)]
pub(crate) struct CommandOutput {
    pub(crate) stdout: Vec<u8>,
    pub(crate) stderr: Vec<u8>,
    pub(crate) status: std::process::ExitStatus,
}

impl CommandOutput {
    pub(crate) fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    pub(crate) fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Try each binary in `candidates` until one exists, then execute it.
pub(crate) fn run_external(candidates: &[&str], args: &[OsString]) -> SetupResult<CommandOutput> {
    for candidate in candidates {
        let path = Path::new(candidate);
        if !path.exists() {
            continue;
        }
        return match Command::new(candidate).args(args).output() {
            Ok(raw) => Ok(CommandOutput {
                stdout: raw.stdout,
                stderr: raw.stderr,
                status: raw.status,
            }),
            Err(err) => Err(SetupError::from_io(err, "running", path)),
        };
    }
    Err(SetupError::Command(format!(
        "none of {candidates:?} are available on this system"
    )))
}

/// The whole run requires root; checked once at entry before any side
/// effect.
pub fn ensure_root() -> SetupResult<()> {
    if running_as_root() {
        Ok(())
    } else {
        Err(SetupError::Privilege(
            "this operation must run as root; re-invoke via sudo".into(),
        ))
    }
}

#[cfg(unix)]
fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    true
}
