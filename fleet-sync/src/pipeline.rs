//! Shared pipeline used by `fleet plan`, `fleet diff` and `fleet sync`.
//!
//! ```text
//! load overrides (all targets, ConfigError aborts)
//!   → per repo: detect → resolve → render → hash → plan
//!   → fan-out execute (sync only)
//! ```
//!
//! Detection and planning failures are per repository: the repository is
//! reported and skipped, the rest of the run continues.

use std::path::PathBuf;

use serde::Serialize;

use fleet_core::{ConfigError, OverrideRule, RepoId, RepoTarget};
use fleet_detector::Detector;
use fleet_templates::{load_overrides, Baseline, RenderContext};

use crate::audit::new_run_id;
use crate::executor::{FanOutExecutor, RunReport, UnitStatus};
use crate::planner::{current_hashes, plan, RepoPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Detection,
    Planning,
}

/// A repository that never reached the executor.
#[derive(Debug, Clone, Serialize)]
pub struct RepoFailure {
    pub repo: RepoId,
    pub path: PathBuf,
    pub stage: FailureStage,
    pub error: String,
}

impl RepoFailure {
    fn new(target: &RepoTarget, stage: FailureStage, error: impl std::fmt::Display) -> Self {
        let error = error.to_string();
        tracing::warn!(repo = %target.id, path = %target.path.display(), stage = ?stage, %error, "repository skipped");
        Self {
            repo: target.id.clone(),
            path: target.path.clone(),
            stage,
            error,
        }
    }
}

/// Plans for every target that could be planned, plus the ones that could not.
#[derive(Debug, Clone)]
pub struct PlanSet {
    pub targets: usize,
    pub plans: Vec<RepoPlan>,
    pub failures: Vec<RepoFailure>,
}

impl PlanSet {
    pub fn detection_failed_for_all(&self) -> bool {
        self.targets > 0
            && self.failures.iter().filter(|f| f.stage == FailureStage::Detection).count() == self.targets
    }
}

/// Outcome of a full `sync` run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub targets: usize,
    pub failures: Vec<RepoFailure>,
    pub run: RunReport,
}

impl SyncReport {
    pub fn detection_failed_for_all(&self) -> bool {
        self.targets > 0
            && self.failures.iter().filter(|f| f.stage == FailureStage::Detection).count() == self.targets
    }

    /// Some repository failed or was cancelled while others may have succeeded.
    pub fn is_partial_failure(&self) -> bool {
        !self.failures.is_empty() || self.run.has_failures() || self.run.was_cancelled()
    }

    pub fn count(&self, status: UnitStatus) -> usize {
        self.run.outcomes.iter().filter(|o| o.status == status).count()
    }
}

pub struct Pipeline {
    detector: Detector,
    baseline: Baseline,
}

impl Pipeline {
    pub fn new(detector: Detector, baseline: Baseline) -> Self {
        Self { detector, baseline }
    }

    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    /// Load every target's override declarations. Any malformed file aborts
    /// the run before a repository is touched.
    pub fn load_all_overrides(targets: &[RepoTarget]) -> Result<Vec<Vec<OverrideRule>>, ConfigError> {
        targets.iter().map(|t| load_overrides(&t.path)).collect()
    }

    /// Detect, resolve, render and plan one repository. Pure with respect to
    /// the repository: nothing is written.
    pub fn plan_repo(&self, target: &RepoTarget, rules: &[OverrideRule]) -> Result<RepoPlan, RepoFailure> {
        let classification = self
            .detector
            .classify(&target.path)
            .map_err(|e| RepoFailure::new(target, FailureStage::Detection, e))?;

        let resolution = self.baseline.effective(classification.platform_type, rules);
        for warning in &resolution.warnings {
            tracing::warn!(repo = %target.id, %warning, "override warning");
        }

        let ctx = RenderContext::new(target, &classification);
        let rendered = self
            .baseline
            .render(&resolution, &ctx)
            .map_err(|e| RepoFailure::new(target, FailureStage::Planning, e))?;
        let current = current_hashes(&target.path, &resolution.mapping)
            .map_err(|e| RepoFailure::new(target, FailureStage::Planning, e))?;

        let desired = rendered
            .iter()
            .map(|(path, file)| (path.clone(), file.hash.clone()))
            .collect();
        let items = plan(&resolution.mapping, &desired, &current);
        let contents = items
            .iter()
            .filter(|i| i.action.is_write())
            .filter_map(|i| rendered.get(&i.target_path).map(|f| (i.target_path.clone(), f.content.clone())))
            .collect();

        tracing::debug!(
            repo = %target.id,
            platform = %classification.platform_type,
            items = items.len(),
            "planned"
        );
        Ok(RepoPlan {
            target: target.clone(),
            classification,
            items,
            contents,
            warnings: resolution.warnings,
        })
    }

    pub fn plan_all(&self, targets: &[RepoTarget]) -> Result<PlanSet, ConfigError> {
        let overrides = Self::load_all_overrides(targets)?;
        let mut set = PlanSet {
            targets: targets.len(),
            plans: Vec::with_capacity(targets.len()),
            failures: Vec::new(),
        };
        for (target, rules) in targets.iter().zip(&overrides) {
            match self.plan_repo(target, rules) {
                Ok(plan) => set.plans.push(plan),
                Err(failure) => set.failures.push(failure),
            }
        }
        Ok(set)
    }

    /// Plan every target and apply the plans through `executor`.
    pub async fn sync(&self, targets: &[RepoTarget], executor: &FanOutExecutor) -> Result<SyncReport, ConfigError> {
        let set = self.plan_all(targets)?;
        let run_id = new_run_id();
        let run = executor.run(&run_id, set.plans).await;
        Ok(SyncReport {
            targets: set.targets,
            failures: set.failures,
            run,
        })
    }
}
