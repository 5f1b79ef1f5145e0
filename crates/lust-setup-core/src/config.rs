//! Target spec model: where the service lands and which artifacts feed it.

use crate::error::{SetupError, SetupResult};
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SPEC_PATH: &str = "/etc/lust-setup.toml";
const SPEC_PATH_ENV: &str = "LUST_SETUP_CONFIG";

pub fn default_service_name() -> &'static str {
    "lust"
}

pub fn default_install_root() -> &'static str {
    "/opt/lust"
}

pub fn default_config_root() -> &'static str {
    "/etc/lust"
}

pub fn default_bin_dir() -> &'static str {
    "/usr/local/bin"
}

pub fn default_unit_dir() -> &'static str {
    "/etc/systemd/system"
}

/// Service identity: unit name and the dedicated system account that owns
/// the install and config roots.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Service {
    pub name: String,

    /// Dedicated unprivileged account/group pair; defaults to the service
    /// name when omitted.
    #[serde(default)]
    pub account: Option<String>,
}

/// Host filesystem layout the provisioner manages.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Layout {
    pub install_root: PathBuf,
    pub config_root: PathBuf,

    /// Directory that receives the executable symlink.
    pub bin_dir: PathBuf,

    /// Directory holding the service manager's unit definitions.
    pub unit_dir: PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            install_root: PathBuf::from(default_install_root()),
            config_root: PathBuf::from(default_config_root()),
            bin_dir: PathBuf::from(default_bin_dir()),
            unit_dir: PathBuf::from(default_unit_dir()),
        }
    }
}

/// Source artifacts copied onto the host. Relative paths are resolved
/// against the artifact directory at load time.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Artifacts {
    /// Compiled daemon executable.
    pub binary: PathBuf,

    /// Static configuration file staged into the config root verbatim.
    pub config_template: PathBuf,

    /// Unit definition source; when omitted a built-in definition is
    /// rendered from the spec.
    #[serde(default)]
    pub unit_template: Option<PathBuf>,
}

impl Default for Artifacts {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("target/release/lust"),
            config_template: PathBuf::from("packaging/config.yaml"),
            unit_template: None,
        }
    }
}

/// Desired end state for one provisioning run. Loaded once, validated once,
/// and immutable for the duration of the run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TargetSpec {
    pub service: Service,

    #[serde(default)]
    pub paths: Layout,

    #[serde(default)]
    pub artifacts: Artifacts,
}

impl Default for TargetSpec {
    fn default() -> Self {
        Self {
            service: Service {
                name: default_service_name().to_string(),
                account: None,
            },
            paths: Layout::default(),
            artifacts: Artifacts::default(),
        }
    }
}

impl TargetSpec {
    /// Load a spec from `path`, falling back to built-in defaults when the
    /// file does not exist. `LUST_SETUP_CONFIG` overrides the path.
    pub fn load_or_default(path: &Path) -> SetupResult<TargetSpec> {
        let path = env::var_os(SPEC_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| path.to_path_buf());

        let spec = if path.exists() {
            Self::load(&path)?
        } else {
            info!(
                "no spec at {}; using built-in defaults",
                path.display()
            );
            TargetSpec::default()
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Parse a spec file, surfacing parse problems as `InvalidSpec`.
    pub fn load(path: &Path) -> SetupResult<TargetSpec> {
        let raw = fs::read_to_string(path)
            .map_err(|err| SetupError::from_io(err, "reading", path))?;
        let spec: TargetSpec = toml::from_str(&raw)
            .map_err(|err| SetupError::InvalidSpec(format!("{}: {err}", path.display())))?;
        Ok(spec)
    }

    /// Reject specs that would drive the planner into nonsense.
    pub fn validate(&self) -> SetupResult<()> {
        if self.service.name.trim().is_empty() {
            return Err(SetupError::InvalidSpec("service.name must not be empty".into()));
        }
        if !self
            .service
            .name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'))
        {
            return Err(SetupError::InvalidSpec(format!(
                "service.name `{}` contains characters unsuitable for a unit name",
                self.service.name
            )));
        }
        if self.account().trim().is_empty() {
            return Err(SetupError::InvalidSpec("service.account must not be empty".into()));
        }
        for (label, path) in [
            ("paths.install_root", &self.paths.install_root),
            ("paths.config_root", &self.paths.config_root),
            ("paths.bin_dir", &self.paths.bin_dir),
            ("paths.unit_dir", &self.paths.unit_dir),
        ] {
            if !path.is_absolute() {
                return Err(SetupError::InvalidSpec(format!(
                    "{label} must be absolute (got {})",
                    path.display()
                )));
            }
            if path == Path::new("/") {
                return Err(SetupError::InvalidSpec(format!("{label} must not be `/`")));
            }
        }
        if self.paths.install_root == self.paths.config_root {
            return Err(SetupError::InvalidSpec(
                "install_root and config_root must differ".into(),
            ));
        }
        Ok(())
    }

    /// Resolve relative artifact sources against `dir`.
    pub fn resolve_artifacts(&mut self, dir: &Path) {
        for source in [&mut self.artifacts.binary, &mut self.artifacts.config_template] {
            if source.is_relative() {
                *source = dir.join(&*source);
            }
        }
        if let Some(unit) = self.artifacts.unit_template.as_mut() {
            if unit.is_relative() {
                *unit = dir.join(&*unit);
            }
        }
    }

    pub fn account(&self) -> &str {
        self.service
            .account
            .as_deref()
            .unwrap_or(&self.service.name)
    }

    pub fn unit_name(&self) -> String {
        format!("{}.service", self.service.name)
    }

    /// Executable destination inside the install root.
    pub fn binary_dest(&self) -> PathBuf {
        self.paths.install_root.join(&self.service.name)
    }

    /// Config destination, keeping the template's file name.
    pub fn config_dest(&self) -> PathBuf {
        let name = self
            .artifacts
            .config_template
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config.yaml"));
        self.paths.config_root.join(name)
    }

    /// Symlink the rest of the system resolves the executable through.
    pub fn link_dest(&self) -> PathBuf {
        self.paths.bin_dir.join(&self.service.name)
    }

    pub fn unit_dest(&self) -> PathBuf {
        self.paths.unit_dir.join(self.unit_name())
    }

    /// Paths the service account is expected to own; everything else it
    /// owns on the host blocks account removal.
    pub fn managed_roots(&self) -> Vec<PathBuf> {
        vec![
            self.paths.install_root.clone(),
            self.paths.config_root.clone(),
        ]
    }
}

/// Commented spec skeleton for `lust-setup template`.
pub fn spec_template() -> String {
    format!(
        "# lust-setup target spec. Adjust paths before provisioning production hosts.\n\n\
[service]\nname = \"{name}\"\n# account defaults to the service name.\n# account = \"{name}\"\n\n\
[paths]\ninstall_root = \"{install}\"\nconfig_root = \"{config}\"\nbin_dir = \"{bin}\"\nunit_dir = \"{unit}\"\n\n\
[artifacts]\n# Compiled daemon executable.\nbinary = \"target/release/{name}\"\n\
# Static config staged into the config root; existing host config is preserved on re-runs.\nconfig_template = \"packaging/config.yaml\"\n\
# Omit to render the built-in unit definition.\n# unit_template = \"packaging/{name}.service\"\n",
        name = default_service_name(),
        install = default_install_root(),
        config = default_config_root(),
        bin = default_bin_dir(),
        unit = default_unit_dir(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spec_validates_and_derives_paths() {
        let spec = TargetSpec::default();
        spec.validate().unwrap();
        assert_eq!(spec.account(), "lust");
        assert_eq!(spec.unit_name(), "lust.service");
        assert_eq!(spec.binary_dest(), PathBuf::from("/opt/lust/lust"));
        assert_eq!(spec.config_dest(), PathBuf::from("/etc/lust/config.yaml"));
        assert_eq!(spec.link_dest(), PathBuf::from("/usr/local/bin/lust"));
        assert_eq!(
            spec.unit_dest(),
            PathBuf::from("/etc/systemd/system/lust.service")
        );
    }

    #[test]
    fn template_round_trips_through_the_parser() {
        let spec: TargetSpec = toml::from_str(&spec_template()).unwrap();
        spec.validate().unwrap();
        assert_eq!(spec.service.name, "lust");
        assert!(spec.artifacts.unit_template.is_none());
    }

    #[test]
    fn relative_roots_are_rejected() {
        let mut spec = TargetSpec::default();
        spec.paths.config_root = PathBuf::from("etc/lust");
        let err = spec.validate().unwrap_err();
        assert!(matches!(err, SetupError::InvalidSpec(_)));
    }

    #[test]
    fn identical_roots_are_rejected() {
        let mut spec = TargetSpec::default();
        spec.paths.config_root = spec.paths.install_root.clone();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn resolve_artifacts_leaves_absolute_sources_alone() {
        let mut spec = TargetSpec::default();
        spec.artifacts.binary = PathBuf::from("/srv/build/lust");
        spec.resolve_artifacts(Path::new("/tmp/artifacts"));
        assert_eq!(spec.artifacts.binary, PathBuf::from("/srv/build/lust"));
        assert_eq!(
            spec.artifacts.config_template,
            PathBuf::from("/tmp/artifacts/packaging/config.yaml")
        );
    }
}
