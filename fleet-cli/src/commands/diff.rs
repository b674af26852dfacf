//! `fleet diff`: unified diffs of what sync would write.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use fleet_core::RepoId;
use fleet_sync::{diff_plan, FileDiff};

use super::{print_failures, status_for};
use crate::context::RunContext;
use crate::targets::{discover, TargetArgs};
use crate::RunStatus;

/// Arguments for `fleet diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    #[command(flatten)]
    pub targets: TargetArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct RepoDiff {
    repo: RepoId,
    diffs: Vec<FileDiff>,
}

impl DiffArgs {
    pub fn run(self, ctx: &RunContext) -> Result<RunStatus> {
        let targets = discover(&self.targets, &ctx.config, &ctx.source)?;
        let pipeline = ctx.pipeline(&self.targets)?;
        let set = pipeline.plan_all(&targets)?;

        let mut repos = Vec::with_capacity(set.plans.len());
        for plan in &set.plans {
            let diffs = diff_plan(plan)
                .with_context(|| format!("diff failed for '{}'", plan.target.id))?;
            repos.push(RepoDiff { repo: plan.target.id.clone(), diffs });
        }

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&repos).context("failed to serialize diff JSON")?
            );
        } else {
            for repo in &repos {
                if repo.diffs.is_empty() {
                    println!("No differences for '{}'.", repo.repo);
                    continue;
                }
                println!("{} {}", "●".cyan().bold(), repo.repo.to_string().bold());
                for diff in &repo.diffs {
                    print!("{}", diff.unified_diff);
                    if !diff.unified_diff.ends_with('\n') {
                        println!();
                    }
                }
            }
            print_failures(&set.failures);
        }

        Ok(status_for(&set.failures, set.detection_failed_for_all()))
    }
}
