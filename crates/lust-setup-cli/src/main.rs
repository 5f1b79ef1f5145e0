//! Command-line installer and decommissioner for the lust daemon.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lust_setup_core::{
    config::{spec_template, TargetSpec, DEFAULT_SPEC_PATH},
    logging, observe,
    workflow::{self, InstallOptions, ProvisionPlan, WorkflowLevel, WorkflowReport},
    SetupError, SystemIdentity, SystemdManager,
};
use schemars::schema_for;
use serde_json::to_string_pretty;
use std::path::{Path, PathBuf};

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "lust-setup",
    version,
    about = "Installs, repairs, and removes the lust daemon as a managed service unit."
)]
struct Cli {
    /// Path to the target spec file.
    #[arg(short, long, default_value = DEFAULT_SPEC_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Subcommands covering the provisioning lifecycle.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the host to installed-and-running.
    Install {
        /// Overwrite an existing config file even when it differs from the
        /// template. Without this flag user edits are preserved.
        #[arg(long)]
        force_config: bool,

        /// Compute and print the plan without executing it.
        #[arg(long)]
        dry_run: bool,

        /// Directory against which relative artifact paths are resolved.
        #[arg(long)]
        artifacts: Option<PathBuf>,

        /// Output format for --dry-run.
        #[arg(long, value_enum, default_value = "plain")]
        format: OutputFormat,
    },

    /// Drive the host back to fully-absent. A no-op on hosts that never saw
    /// the service.
    Uninstall {
        /// Compute and print the plan without executing it.
        #[arg(long)]
        dry_run: bool,

        /// Output format for --dry-run.
        #[arg(long, value_enum, default_value = "plain")]
        format: OutputFormat,
    },

    /// Show the live host state for the configured service.
    Status {
        #[arg(long, value_enum, default_value = "plain")]
        format: OutputFormat,
    },

    /// Emit the commented target spec template.
    Template,

    /// Validate a spec file or emit the spec JSON schema.
    Validate {
        /// Path to the spec file to validate.
        #[arg(short = 'f', long, default_value = DEFAULT_SPEC_PATH)]
        file: PathBuf,

        /// Output the JSON schema instead of validating a file.
        #[arg(long)]
        schema: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Plain,
    Json,
}

/// Entry point: parse arguments and surface errors with an exit code.
/// Privilege failures use a distinct status so callers can tell "re-run via
/// sudo" apart from a mid-run failure.
fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        let code = match err.downcast_ref::<SetupError>() {
            Some(SetupError::Privilege(_)) => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}

fn run() -> Result<()> {
    logging::init("info");
    let cli = Cli::parse();
    let spec_path = cli.config.clone();

    match cli.command {
        Commands::Install {
            force_config,
            dry_run,
            artifacts,
            format,
        } => {
            let mut spec = load_spec(&spec_path)?;
            if let Some(dir) = artifacts {
                spec.resolve_artifacts(&dir);
            }
            let manager = SystemdManager::discover()?;
            let identity = SystemIdentity;

            if dry_run {
                let state = observe(&spec, &manager, &identity)?;
                let plan = workflow::install_plan(&state, &spec, force_config)?;
                print_plan(&plan, format)?;
                return Ok(());
            }

            workflow::ensure_root()?;
            let report = workflow::install(
                &spec,
                &manager,
                &identity,
                InstallOptions { force_config },
            )?;
            print_report(report);
            Ok(())
        }
        Commands::Uninstall { dry_run, format } => {
            let spec = load_spec(&spec_path)?;
            let manager = SystemdManager::discover()?;
            let identity = SystemIdentity;

            if dry_run {
                let state = observe(&spec, &manager, &identity)?;
                let plan = workflow::uninstall_plan(&state, &spec)?;
                print_plan(&plan, format)?;
                return Ok(());
            }

            workflow::ensure_root()?;
            let report = workflow::uninstall(&spec, &manager, &identity)?;
            print_report(report);
            Ok(())
        }
        Commands::Status { format } => {
            let spec = load_spec(&spec_path)?;
            let manager = SystemdManager::discover()?;
            let identity = SystemIdentity;
            let state = observe(&spec, &manager, &identity)?;
            match format {
                OutputFormat::Json => println!("{}", to_string_pretty(&state)?),
                OutputFormat::Plain => {
                    println!("{}:", spec.unit_name());
                    for (label, value) in [
                        ("binary", state.binary_present),
                        ("config", state.config_present),
                        ("bin link", state.link_present),
                        ("unit file", state.unit_file_present),
                        ("account", state.account_exists),
                        ("enabled", state.unit_enabled),
                        ("active", state.unit_active),
                    ] {
                        println!("  {label:<10} {}", if value { "yes" } else { "no" });
                    }
                }
            }
            Ok(())
        }
        Commands::Template => {
            print!("{}", spec_template());
            Ok(())
        }
        Commands::Validate { file, schema } => {
            if schema {
                println!("{}", to_string_pretty(&schema_for!(TargetSpec))?);
                return Ok(());
            }
            let spec = TargetSpec::load(&file)?;
            spec.validate()?;
            println!("{} is valid for {}", file.display(), spec.unit_name());
            Ok(())
        }
    }
}

fn load_spec(path: &Path) -> Result<TargetSpec> {
    TargetSpec::load_or_default(path)
        .with_context(|| format!("failed to load target spec from {}", path.display()))
}

fn print_plan(plan: &ProvisionPlan, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", to_string_pretty(plan)?),
        OutputFormat::Plain => {
            if plan.is_empty() {
                println!("{}: nothing to do", plan.operation);
                return Ok(());
            }
            println!("{} plan:", plan.operation);
            for (index, step) in plan.steps.iter().enumerate() {
                println!("  {}. {}", index + 1, step.title);
            }
        }
    }
    Ok(())
}

fn print_report(report: WorkflowReport) {
    println!("{}", report.title);
    for event in report.events {
        println!("  [{}] {}", level_tag(event.level), event.message);
    }
}

fn level_tag(level: WorkflowLevel) -> &'static str {
    match level {
        WorkflowLevel::Info => "info",
        WorkflowLevel::Success => "ok",
        WorkflowLevel::Warn => "warn",
    }
}
