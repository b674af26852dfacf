//! `fleet detect`: classify each selected repository.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use fleet_core::{ClassificationResult, RepoId};

use crate::context::RunContext;
use crate::targets::{discover, TargetArgs};
use crate::RunStatus;

/// Arguments for `fleet detect`.
#[derive(Args, Debug)]
pub struct DetectArgs {
    #[command(flatten)]
    pub targets: TargetArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct DetectRow {
    repo: RepoId,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    classification: Option<ClassificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Tabled)]
struct DetectTableRow {
    #[tabled(rename = "repository")]
    repo: String,
    #[tabled(rename = "platform")]
    platform: String,
    #[tabled(rename = "confidence")]
    confidence: String,
    #[tabled(rename = "evidence")]
    evidence: String,
}

impl DetectArgs {
    pub fn run(self, ctx: &RunContext) -> Result<RunStatus> {
        let targets = discover(&self.targets, &ctx.config, &ctx.source)?;
        let detector = ctx.detector(&self.targets)?;

        let rows: Vec<DetectRow> = targets
            .iter()
            .map(|target| {
                let (classification, error) = match detector.classify(&target.path) {
                    Ok(result) => (Some(result), None),
                    Err(err) => {
                        tracing::warn!(repo = %target.id, error = %err, "detection failed");
                        (None, Some(err.to_string()))
                    }
                };
                DetectRow {
                    repo: target.id.clone(),
                    path: target.path.display().to_string(),
                    classification,
                    error,
                }
            })
            .collect();

        let failed = rows.iter().filter(|r| r.error.is_some()).count();
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize detection JSON")?
            );
        } else {
            print_table(&rows);
        }

        Ok(if !rows.is_empty() && failed == rows.len() {
            RunStatus::DetectionFailed
        } else if failed > 0 {
            RunStatus::PartialFailure
        } else {
            RunStatus::Success
        })
    }
}

fn print_table(rows: &[DetectRow]) {
    if rows.is_empty() {
        println!("No repositories matched.");
        return;
    }
    let table_rows: Vec<DetectTableRow> = rows
        .iter()
        .map(|row| match (&row.classification, &row.error) {
            (Some(c), _) => DetectTableRow {
                repo: row.repo.to_string(),
                platform: c.platform_type.to_string(),
                confidence: c.confidence.to_string(),
                evidence: summarize_indicators(c),
            },
            (None, error) => DetectTableRow {
                repo: row.repo.to_string(),
                platform: "—".to_string(),
                confidence: "—".to_string(),
                evidence: error.clone().unwrap_or_default(),
            },
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn summarize_indicators(result: &ClassificationResult) -> String {
    if result.indicators.is_empty() {
        return "no indicators".to_string();
    }
    let mut ids: Vec<&str> = result
        .indicators
        .iter()
        .take(3)
        .map(|i| i.signal_id.as_str())
        .collect();
    let more = result.indicators.len().saturating_sub(ids.len());
    let extra = format!("+{more} more");
    if more > 0 {
        ids.push(&extra);
    }
    ids.join(", ")
}
