//! Error taxonomy shared by every provisioning component.

use std::path::PathBuf;
use thiserror::Error;

pub type SetupResult<T> = Result<T, SetupError>;

/// Every failure a provisioning run can surface. All variants are fatal at
/// the point they occur; the orchestrators abort in place and re-running the
/// same operation is the recovery procedure.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The run lacks the privilege to perform an action.
    #[error("permission denied while {action} {path}")]
    PermissionDenied { action: &'static str, path: PathBuf },

    /// A source artifact named by the target spec is missing or unreadable.
    #[error("source artifact not found: {0}")]
    SourceNotFound(PathBuf),

    /// A target path is occupied by an incompatible filesystem object.
    #[error("path conflict at {path}: expected {expected}, found {found}")]
    PathConflict {
        path: PathBuf,
        expected: &'static str,
        found: &'static str,
    },

    /// The service account owns files outside the managed roots and will not
    /// be removed.
    #[error("account `{account}` owns files outside the managed roots; refusing to remove it")]
    AccountInUse { account: String, paths: Vec<PathBuf> },

    /// The service manager failed to reload its unit catalog. Escalated,
    /// since lifecycle actions against a stale catalog may target the wrong
    /// unit definition.
    #[error("service manager catalog reload failed: {0}")]
    ManagerReloadFailed(String),

    /// A lifecycle transition did not land in the intended state.
    #[error("unit {unit} did not reach {expected}; observed {observed}")]
    LifecycleTransitionFailed {
        unit: String,
        expected: String,
        observed: String,
    },

    /// The run is missing the privilege required to start at all.
    #[error("{0}")]
    Privilege(String),

    /// The target spec is malformed.
    #[error("invalid target spec: {0}")]
    InvalidSpec(String),

    /// An external host command failed in a way the taxonomy does not cover
    /// more precisely.
    #[error("{0}")]
    Command(String),

    /// A plan step failed; the cause is folded into the message so the
    /// operator sees the failing step and its reason in one line.
    #[error("step `{step}` failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<SetupError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SetupError {
    /// Wrap a component error with the title of the plan step that ran it.
    pub(crate) fn in_step(self, step: &str) -> SetupError {
        SetupError::Step {
            step: step.to_string(),
            source: Box::new(self),
        }
    }

    /// Translate an io error into the taxonomy, keeping permission problems
    /// distinct from generic io failures.
    pub(crate) fn from_io(err: std::io::Error, action: &'static str, path: &std::path::Path) -> SetupError {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            SetupError::PermissionDenied {
                action,
                path: path.to_path_buf(),
            }
        } else {
            SetupError::Io(err)
        }
    }
}
