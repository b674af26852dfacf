//! `fleet plan`: show what a sync would do, without touching anything.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use fleet_core::{ChangeAction, ChangeItem, PlatformType, RepoId};
use fleet_sync::{RepoFailure, RepoPlan};
use fleet_templates::OverrideWarning;

use super::{print_failures, status_for};
use crate::context::RunContext;
use crate::targets::{discover, TargetArgs};
use crate::RunStatus;

/// Arguments for `fleet plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub targets: TargetArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct PlanJson<'a> {
    plans: Vec<RepoPlanJson<'a>>,
    failures: &'a [RepoFailure],
}

#[derive(Serialize)]
struct RepoPlanJson<'a> {
    repo: &'a RepoId,
    path: String,
    platform: PlatformType,
    confidence: u8,
    items: &'a [ChangeItem],
    warnings: &'a [OverrideWarning],
}

#[derive(Tabled)]
struct ItemRow {
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "action")]
    action: String,
    #[tabled(rename = "decided by")]
    source: String,
    #[tabled(rename = "reason")]
    reason: String,
}

impl PlanArgs {
    pub fn run(self, ctx: &RunContext) -> Result<RunStatus> {
        let targets = discover(&self.targets, &ctx.config, &ctx.source)?;
        let pipeline = ctx.pipeline(&self.targets)?;
        let set = pipeline.plan_all(&targets)?;

        if self.json {
            let payload = PlanJson {
                plans: set.plans.iter().map(plan_json).collect(),
                failures: &set.failures,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize plan JSON")?
            );
        } else {
            if set.plans.is_empty() && set.failures.is_empty() {
                println!("No repositories matched.");
            }
            for plan in &set.plans {
                print_plan(plan);
            }
            print_failures(&set.failures);
        }

        Ok(status_for(&set.failures, set.detection_failed_for_all()))
    }
}

fn plan_json(plan: &RepoPlan) -> RepoPlanJson<'_> {
    RepoPlanJson {
        repo: &plan.target.id,
        path: plan.target.path.display().to_string(),
        platform: plan.classification.platform_type,
        confidence: plan.classification.confidence,
        items: &plan.items,
        warnings: &plan.warnings,
    }
}

fn print_plan(plan: &RepoPlan) {
    let writes = plan.writes().count();
    println!(
        "{} {} ({} {}%) | {} to write, {} up to date",
        "●".cyan().bold(),
        plan.target.id.to_string().bold(),
        plan.classification.platform_type,
        plan.classification.confidence,
        writes,
        plan.items.len() - writes,
    );
    for warning in &plan.warnings {
        println!("  {} {warning}", "!".yellow().bold());
    }

    let rows: Vec<ItemRow> = plan
        .items
        .iter()
        .map(|item| ItemRow {
            path: item.target_path.clone(),
            action: action_label(item.action),
            source: item.decision_source.to_string(),
            reason: item.reason.clone(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn action_label(action: ChangeAction) -> String {
    match action {
        ChangeAction::Create => "create".green().to_string(),
        ChangeAction::Update => "update".yellow().to_string(),
        ChangeAction::Skip => "skip".bright_black().to_string(),
    }
}
