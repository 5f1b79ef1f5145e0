//! Unit registrar: stages the service manager's unit definition and keeps
//! its catalog in sync with what is on disk.

use crate::config::TargetSpec;
use crate::error::{SetupError, SetupResult};
use crate::provider::ServiceManager;
use crate::stage::{self, FileOutcome};
use log::info;
use std::fs;

const UNIT_MODE: u32 = 0o644;

/// Unit definition content for `spec`: the template file verbatim when one
/// is named, otherwise the built-in rendering.
pub(crate) fn unit_content(spec: &TargetSpec) -> SetupResult<Vec<u8>> {
    match spec.artifacts.unit_template.as_deref() {
        Some(template) => match fs::read(template) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(SetupError::SourceNotFound(template.to_path_buf()))
            }
            Err(err) => Err(SetupError::from_io(err, "reading", template)),
        },
        None => Ok(render_default_unit(spec).into_bytes()),
    }
}

/// Built-in unit definition used when the spec names no template.
pub fn render_default_unit(spec: &TargetSpec) -> String {
    format!(
        "[Unit]\n\
Description={name} daemon\n\
Wants=network-online.target\n\
After=network.target network-online.target\n\
\n\
[Service]\n\
Type=simple\n\
User={account}\n\
Group={account}\n\
ExecStart={exec} --config {config}\n\
WorkingDirectory={workdir}\n\
Restart=on-failure\n\
\n\
[Install]\n\
WantedBy=multi-user.target\n",
        name = spec.service.name,
        account = spec.account(),
        exec = spec.link_dest().display(),
        config = spec.config_dest().display(),
        workdir = spec.paths.install_root.display(),
    )
}

/// Whether the definition at the destination differs from `content`.
/// Content-hash comparison avoids spurious writes and therefore spurious
/// catalog reloads.
pub(crate) fn needs_install(spec: &TargetSpec, content: &[u8]) -> SetupResult<bool> {
    let dest = spec.unit_dest();
    Ok(stage::file_digest(&dest)?.as_deref() != Some(stage::content_digest(content).as_str()))
}

/// Write the unit definition; no-op when the destination already carries
/// identical content.
pub(crate) fn install_unit(spec: &TargetSpec, content: &[u8]) -> SetupResult<FileOutcome> {
    let dest = spec.unit_dest();
    stage::ensure_directory(&spec.paths.unit_dir, None, 0o755)?;
    let outcome = stage::ensure_file_content(&dest, content, None, UNIT_MODE)?;
    if outcome == FileOutcome::Written {
        info!("installed unit definition at {}", dest.display());
    }
    Ok(outcome)
}

pub(crate) fn remove_unit(spec: &TargetSpec) -> SetupResult<bool> {
    stage::remove_file(&spec.unit_dest())
}

/// Reload the manager's unit catalog. Fatal when it fails: proceeding to
/// enable/start against a stale catalog risks operating on the wrong unit
/// definition.
pub(crate) fn reload_catalog<M>(manager: &M) -> SetupResult<()>
where
    M: ServiceManager<Error = SetupError>,
{
    manager.reload_catalog()
}
