//! `fleet sync`: reconcile repositories with the baseline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use fleet_sync::{
    ExecutorOptions, FanOutExecutor, GitTransport, JsonlAuditSink, RepoOutcome, SyncReport, UnitStatus,
};

use super::print_failures;
use crate::context::RunContext;
use crate::targets::{discover, TargetArgs};
use crate::{ModeArg, RunStatus};

/// Arguments for `fleet sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub targets: TargetArgs,

    /// Plan and audit without writing, committing, or opening reviews.
    #[arg(long)]
    pub dry_run: bool,

    /// Repositories processed concurrently (overrides `parallel`).
    #[arg(long, value_name = "N")]
    pub parallel: Option<usize>,

    /// `review` (branch + review request) or `direct` (commit in place).
    #[arg(long, value_name = "MODE")]
    pub mode: Option<ModeArg>,

    /// Emit the run report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self, mut ctx: RunContext) -> Result<RunStatus> {
        ctx.override_parallel(self.parallel)?;
        if let Some(mode) = self.mode {
            ctx.config.mode = mode.0;
        }
        let targets = discover(&self.targets, &ctx.config, &ctx.source)?;
        let pipeline = ctx.pipeline(&self.targets)?;

        let options = ExecutorOptions {
            parallel: ctx.config.parallel,
            step_timeout: Duration::from_secs(ctx.config.step_timeout_secs),
            mode: ctx.config.mode,
            branch: ctx.config.branch.clone(),
            dry_run: self.dry_run,
        };
        let cancel = CancellationToken::new();
        let executor = FanOutExecutor::new(
            Arc::new(GitTransport::new()),
            Arc::new(JsonlAuditSink::new(ctx.audit_dir())),
            options,
        )
        .with_cancellation(cancel.clone());

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start the async runtime")?;
        let report = runtime.block_on(async {
            let watcher = tokio::spawn(interrupt_watcher(cancel.clone()));
            let report = pipeline.sync(&targets, &executor).await;
            cancel.cancel();
            let _ = watcher.await;
            report
        })?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize sync report")?
            );
        } else {
            print_report(&report, self.dry_run);
            println!("audit: {}", ctx.audit_dir().join(&report.run.run_id.0).display());
        }

        Ok(if report.detection_failed_for_all() {
            RunStatus::DetectionFailed
        } else if report.is_partial_failure() {
            RunStatus::PartialFailure
        } else {
            RunStatus::Success
        })
    }
}

/// Trip `cancel` on Ctrl-C; returns once either happens.
async fn interrupt_watcher(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::warn!(error = %err, "cannot listen for Ctrl-C");
                return;
            }
            tracing::warn!("interrupt received; no new repositories will start");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }
}

fn print_report(report: &SyncReport, dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    if report.targets == 0 {
        println!("No repositories matched.");
        return;
    }
    for outcome in &report.run.outcomes {
        print_outcome(prefix, outcome);
    }
    print_failures(&report.failures);

    println!(
        "{prefix}{} applied, {} unchanged, {} failed, {} cancelled, {} skipped",
        report.count(UnitStatus::Applied) + report.count(UnitStatus::DryRun),
        report.count(UnitStatus::Unchanged),
        report.count(UnitStatus::Failed),
        report.count(UnitStatus::Cancelled),
        report.failures.len(),
    );
}

fn print_outcome(prefix: &str, outcome: &RepoOutcome) {
    let name = &outcome.repo;
    match outcome.status {
        UnitStatus::Applied => {
            println!("{prefix}{} '{name}' synced ({} written)", "✓".green().bold(), outcome.written.len());
            for path in &outcome.written {
                println!("  ✎  {path}");
            }
            if let Some(review) = &outcome.review {
                match &review.url {
                    Some(url) => println!("  →  review: {url}"),
                    None => println!("  →  branch ready for review: {}", review.branch),
                }
            }
        }
        UnitStatus::DryRun => {
            println!("{prefix}{} '{name}' ({} would be written)", "✓".green().bold(), outcome.planned.len());
            for path in &outcome.planned {
                println!("  ~  {path}");
            }
        }
        UnitStatus::Unchanged => println!("{prefix}{} '{name}' is up to date", "✓".green().bold()),
        UnitStatus::Failed => {
            let step = outcome.failed_step.map(|s| s.to_string()).unwrap_or_default();
            println!(
                "{prefix}{} '{name}' failed at {step}: {}",
                "✗".red().bold(),
                outcome.error.as_deref().unwrap_or("unknown error")
            );
            for path in &outcome.written {
                println!("  ✎  {path} (left in place)");
            }
        }
        UnitStatus::Cancelled => println!("{prefix}{} '{name}' cancelled", "■".yellow().bold()),
    }
}
