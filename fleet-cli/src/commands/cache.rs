//! `fleet cache`: detection cache maintenance.

use anyhow::{Context, Result};
use clap::Subcommand;

use fleet_detector::DetectionCache;

use crate::context::RunContext;
use crate::RunStatus;

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Remove every cached classification.
    Clear,
}

pub fn run(command: CacheCommand, ctx: &RunContext) -> Result<RunStatus> {
    match command {
        CacheCommand::Clear => {
            let removed = ctx.cache().clear().context("failed to clear the detection cache")?;
            println!("Removed {removed} cached classification(s).");
        }
    }
    Ok(RunStatus::Success)
}
