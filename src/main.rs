//! SDF Check
//!
//! Static validator for system description files of seL4-style
//! microkernel systems. A description declares memory regions, protection
//! domains, virtual machines and the channels between them; sdf-check
//! verifies it against an architecture profile and produces a resolved
//! system model.
//!
//! # Usage
//!
//! ```bash
//! # Validate a description
//! sdf-check check system.sdf --arch aarch64
//!
//! # Also inspect program images
//! sdf-check check system.sdf -a aarch64 -s build/
//!
//! # Write the resolved model as TOML
//! sdf-check build system.sdf -o system.toml
//!
//! # Write the normalised description
//! sdf-check emit system.sdf -o normalised.sdf
//!
//! # Architecture profiles
//! sdf-check arch list
//! sdf-check arch show riscv64 --toml
//! ```

mod arch;
mod image;
mod report;
mod sdf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

use arch::{get_profile, profile_names, select_profile, ArchProfile};
use sdf::{BuildConfig, Diagnostics, Validation};

/// SDF Check
///
/// Static validator for microkernel system descriptions
#[derive(Parser)]
#[command(name = "sdf-check")]
#[command(author = "Prasanna Gautam")]
#[command(version = "0.1.0")]
#[command(about = "Validate microkernel system description files against an architecture")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a system description
    Check {
        /// Path to the system description
        file: PathBuf,

        #[command(flatten)]
        target: TargetArgs,

        /// Directory to look for program images in (repeatable)
        #[arg(short, long = "search-path")]
        search_path: Vec<PathBuf>,
    },

    /// Validate and write the resolved model as TOML
    Build {
        /// Path to the system description
        file: PathBuf,

        #[command(flatten)]
        target: TargetArgs,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate and write the normalised system description
    Emit {
        /// Path to the system description
        file: PathBuf,

        #[command(flatten)]
        target: TargetArgs,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Architecture profile operations
    #[command(subcommand)]
    Arch(ArchCommands),
}

#[derive(Args)]
struct TargetArgs {
    /// Architecture profile (e.g., aarch64, riscv64, x86_64)
    #[arg(short, long, default_value = "generic")]
    arch: String,

    /// Load the architecture profile from a TOML file
    #[arg(long, conflicts_with = "arch")]
    arch_file: Option<PathBuf>,

    /// Keep every region without an explicit page size at the smallest page size
    #[arg(long)]
    no_page_promotion: bool,
}

impl TargetArgs {
    fn profile(&self) -> Result<ArchProfile> {
        select_profile(&self.arch, self.arch_file.as_deref())
    }
}

#[derive(Subcommand)]
enum ArchCommands {
    /// List built-in architecture profiles
    List,

    /// Show an architecture profile
    Show {
        /// Profile name (e.g., aarch64, riscv64)
        arch: String,

        /// Print as TOML, usable with --arch-file
        #[arg(long)]
        toml: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    match cli.command {
        Commands::Check {
            file,
            target,
            search_path,
        } => handle_check(&file, &target, &search_path),
        Commands::Build {
            file,
            target,
            output,
        } => handle_build(&file, &target, output.as_deref()),
        Commands::Emit {
            file,
            target,
            output,
        } => handle_emit(&file, &target, output.as_deref()),
        Commands::Arch(cmd) => handle_arch(cmd),
    }
}

/// Read and validate `file` against the selected profile
fn run_validation(file: &Path, target: &TargetArgs) -> Result<(ArchProfile, Result<Validation, Diagnostics>)> {
    let profile = target.profile()?;
    let source = fs::read_to_string(file)
        .with_context(|| format!("Failed to read system description: {}", file.display()))?;

    log::debug!("validating {} against {}", file.display(), profile.id);

    let config = BuildConfig {
        profile: &profile,
        promote_page_sizes: !target.no_page_promotion,
    };
    let outcome = sdf::validate_with(&source, &config);

    Ok((profile, outcome))
}

fn handle_check(file: &Path, target: &TargetArgs, search_paths: &[PathBuf]) -> Result<()> {
    let (profile, outcome) = run_validation(file, target)?;

    let image_warnings = match &outcome {
        Ok(validation) if !search_paths.is_empty() => {
            image::inspect_images(&validation.model, search_paths, &profile)
        }
        _ => Vec::new(),
    };

    report::print_check_report(file, &profile, &outcome, &image_warnings);

    if outcome.is_err() {
        std::process::exit(1);
    }
    Ok(())
}

fn handle_build(file: &Path, target: &TargetArgs, output: Option<&Path>) -> Result<()> {
    let (_, outcome) = run_validation(file, target)?;
    let validation = match outcome {
        Ok(validation) => validation,
        Err(diags) => {
            report::print_diagnostics(file, &diags);
            std::process::exit(1);
        }
    };

    let model = &validation.model;
    let text = model.to_toml().context("Failed to serialise system model")?;
    let fingerprint = model.fingerprint().context("Failed to serialise system model")?;
    log::info!("model fingerprint: crc32:{:08x}", fingerprint);

    let document = format!(
        "# Generated by sdf-check from {}\n# fingerprint: crc32:{:08x}\n\n{}",
        file.display(),
        fingerprint,
        text
    );
    write_output(output, &document)
}

fn handle_emit(file: &Path, target: &TargetArgs, output: Option<&Path>) -> Result<()> {
    let (_, outcome) = run_validation(file, target)?;
    match outcome {
        Ok(validation) => write_output(output, &sdf::to_sdf(&validation.model)),
        Err(diags) => {
            report::print_diagnostics(file, &diags);
            std::process::exit(1);
        }
    }
}

fn write_output(output: Option<&Path>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{} Wrote {}", "[PASS]".green(), path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn handle_arch(cmd: ArchCommands) -> Result<()> {
    match cmd {
        ArchCommands::List => {
            let profiles: Vec<&ArchProfile> =
                profile_names().into_iter().filter_map(get_profile).collect();
            report::print_profile_list(&profiles);
        }

        ArchCommands::Show { arch, toml } => {
            let profile = get_profile(&arch).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown architecture: {}. Use 'sdf-check arch list' to see available profiles.",
                    arch
                )
            })?;

            if toml {
                let text = toml::to_string_pretty(profile).context("Failed to serialise profile")?;
                print!("{}", text);
            } else {
                report::print_profile(profile);
            }
        }
    }

    Ok(())
}
