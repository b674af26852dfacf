//! fleet: baseline governance for a fleet of repositories.
//!
//! # Usage
//!
//! ```text
//! fleet detect [--repo <path>]… [--org <name>] [--filter <glob>] [--use-cache] [--json]
//! fleet plan   <targets> [--json]
//! fleet diff   <targets>
//! fleet sync   <targets> [--dry-run] [--parallel <n>] [--mode review|direct] [--json]
//! fleet cache clear
//! ```
//!
//! Exit codes: `0` success, `1` detection failed for every target, `2`
//! configuration error, `3` partial failure.

mod commands;
mod context;
mod targets;

use std::fmt;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

use commands::{
    cache::CacheCommand, detect::DetectArgs, diff::DiffArgs, plan::PlanArgs, sync::SyncArgs,
};
use context::RunContext;
use fleet_core::{ApplyMode, ConfigError};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "fleet",
    version,
    about = "Detect repository platforms and reconcile them against a governance baseline",
    long_about = None,
)]
struct Cli {
    /// Configuration file (default: ~/.fleet/config.yaml).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<std::path::PathBuf>,

    /// Log progress to stderr (`RUST_LOG` takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify each repository's platform.
    Detect(DetectArgs),

    /// Show the change items each repository needs. Writes nothing.
    Plan(PlanArgs),

    /// Show unified diffs of the files a sync would write.
    Diff(DiffArgs),

    /// Reconcile repositories with the baseline.
    Sync(SyncArgs),

    /// Manage the detection cache.
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

// ---------------------------------------------------------------------------
// Shared ApplyMode argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `ApplyMode` from CLI args.
#[derive(Debug, Clone, Copy)]
pub struct ModeArg(pub ApplyMode);

impl FromStr for ModeArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "review" => Ok(Self(ApplyMode::Review)),
            "direct" => Ok(Self(ApplyMode::Direct)),
            other => Err(format!("unknown mode '{other}'; expected: review, direct")),
        }
    }
}

impl fmt::Display for ModeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            ApplyMode::Review => f.write_str("review"),
            ApplyMode::Direct => f.write_str("direct"),
        }
    }
}

// ---------------------------------------------------------------------------
// Exit status
// ---------------------------------------------------------------------------

/// How a command finished, when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// No target could be classified.
    DetectionFailed,
    /// At least one repository failed or was cancelled.
    PartialFailure,
}

impl RunStatus {
    fn code(self) -> u8 {
        match self {
            RunStatus::Success => 0,
            RunStatus::DetectionFailed => 1,
            RunStatus::PartialFailure => 3,
        }
    }
}

/// `2` for configuration errors anywhere in the chain, `1` otherwise.
fn error_code(err: &anyhow::Error) -> u8 {
    if err.chain().any(|cause| cause.downcast_ref::<ConfigError>().is_some()) {
        2
    } else {
        1
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<RunStatus> {
    let ctx = RunContext::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Detect(args) => args.run(&ctx),
        Commands::Plan(args) => args.run(&ctx),
        Commands::Diff(args) => args.run(&ctx),
        Commands::Sync(args) => args.run(ctx),
        Commands::Cache { command } => commands::cache::run(command, &ctx),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(status) => ExitCode::from(status.code()),
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::from(error_code(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_anywhere_in_chain_exits_2() {
        let err = anyhow::Error::new(ConfigError::invalid("config.yaml", "parallel must be at least 1"))
            .context("failed to load configuration");
        assert_eq!(error_code(&err), 2);
        assert_eq!(error_code(&anyhow::anyhow!("stdout closed")), 1);
    }

    #[test]
    fn mode_arg_parses_case_insensitively() {
        assert_eq!(ModeArg::from_str("Direct").unwrap().0, ApplyMode::Direct);
        assert!(ModeArg::from_str("push").is_err());
    }
}
