//! Fan-out executor.
//!
//! One unit of work per repository, run on a bounded pool
//! (`buffer_unordered(parallel)`). A unit's sequence is
//!
//! ```text
//! audit(planned) → prepare → [checkout] → write… → commit → [open review] → audit(executed)
//! ```
//!
//! with `[..]` steps only in review mode. Any failure aborts that unit alone.
//! Files written before the failure stay on disk: there is no rollback, and
//! re-running the pipeline converges. Cancellation stops new units from
//! starting; running units stop at the next step boundary.
//!
//! A timed-out step is abandoned, not killed: its blocking task may still
//! finish. For a write, the executed record carries the hash found on disk
//! when the timeout fired, and the file may still change after that.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use fleet_core::{fsio, ApplyMode, AuditRecord, AuditResult, ChangeAction, ChangeItem, RepoId, RepoTarget, RunId};

use crate::audit::{executed_record, planned_record, AuditSink, ItemOutcome};
use crate::error::{ExecutionError, Step};
use crate::planner::RepoPlan;
use crate::transport::{RepoTransport, ReviewHandle};
use crate::writer::write_change;

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub parallel: usize,
    pub step_timeout: Duration,
    pub mode: ApplyMode,
    pub branch: String,
    pub dry_run: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            parallel: 4,
            step_timeout: Duration::from_secs(120),
            mode: ApplyMode::Review,
            branch: "fleet/baseline-sync".to_string(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Changes written and committed.
    Applied,
    /// Nothing to write.
    Unchanged,
    /// Dry run: audited, nothing touched.
    DryRun,
    Failed,
    /// Never started, or stopped at a step boundary.
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepoOutcome {
    pub repo: RepoId,
    pub path: PathBuf,
    pub status: UnitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Target paths the plan creates or updates.
    pub planned: Vec<String>,
    /// Target paths written in this run, including ones left behind by a
    /// later failure.
    pub written: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewHandle>,
}

impl RepoOutcome {
    fn new(target: &RepoTarget, status: UnitStatus) -> Self {
        Self {
            repo: target.id.clone(),
            path: target.path.clone(),
            status,
            failed_step: None,
            failed_path: None,
            error: None,
            planned: Vec::new(),
            written: Vec::new(),
            commit: None,
            review: None,
        }
    }
}

/// Aggregated per-unit outcomes of one run, sorted by repository id.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub outcomes: Vec<RepoOutcome>,
}

impl RunReport {
    pub fn failed(&self) -> impl Iterator<Item = &RepoOutcome> {
        self.outcomes.iter().filter(|o| o.status == UnitStatus::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    pub fn was_cancelled(&self) -> bool {
        self.outcomes.iter().any(|o| o.status == UnitStatus::Cancelled)
    }

    pub fn outcome(&self, repo: &str) -> Option<&RepoOutcome> {
        self.outcomes.iter().find(|o| o.repo.0 == repo)
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct FanOutExecutor {
    transport: Arc<dyn RepoTransport>,
    audit: Arc<dyn AuditSink>,
    options: ExecutorOptions,
    cancel: CancellationToken,
}

impl FanOutExecutor {
    pub fn new(
        transport: Arc<dyn RepoTransport>,
        audit: Arc<dyn AuditSink>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            transport,
            audit,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Share an externally owned token (e.g. tripped by Ctrl-C).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Apply every plan. Never fails as a whole: each unit's result lands in
    /// the report.
    pub async fn run(&self, run_id: &RunId, plans: Vec<RepoPlan>) -> RunReport {
        let parallel = self.options.parallel.max(1);
        tracing::info!(run_id = %run_id, repos = plans.len(), parallel, dry_run = self.options.dry_run, "executing");

        let mut outcomes: Vec<RepoOutcome> = stream::iter(plans)
            .map(|plan| self.execute_unit(run_id, plan))
            .buffer_unordered(parallel)
            .collect()
            .await;
        outcomes.sort_by(|a, b| a.repo.cmp(&b.repo).then_with(|| a.path.cmp(&b.path)));

        RunReport { run_id: run_id.clone(), outcomes }
    }

    async fn execute_unit(&self, run_id: &RunId, plan: RepoPlan) -> RepoOutcome {
        let target = plan.target.clone();
        let planned: Vec<String> = plan.writes().map(|i| i.target_path.clone()).collect();
        if self.cancel.is_cancelled() {
            tracing::info!(repo = %target.id, "cancelled before start");
            let mut outcome = RepoOutcome::new(&target, UnitStatus::Cancelled);
            outcome.planned = planned;
            return outcome;
        }

        let dry_run = self.options.dry_run;
        let mut ledger: Vec<AuditRecord> = plan
            .items
            .iter()
            .map(|item| planned_record(run_id, &target.id, item, dry_run))
            .collect();
        if let Err(err) = self.flush(run_id, &target, &ledger).await {
            return failed(RepoOutcome::new(&target, UnitStatus::Failed), &target, err);
        }

        let mut state = UnitState::default();
        let result = if dry_run {
            Ok(UnitStatus::DryRun)
        } else if !plan.has_writes() {
            Ok(UnitStatus::Unchanged)
        } else {
            self.apply(run_id, &plan, &mut state).await
        };

        let status = match &result {
            Ok(status) => *status,
            Err(_) => UnitStatus::Failed,
        };
        let error_text = result.as_ref().err().map(|e| e.to_string());

        for item in &plan.items {
            let outcome = item_outcome(item, &state, status, dry_run, error_text.as_deref());
            ledger.push(executed_record(run_id, &target.id, item, outcome, dry_run));
        }

        let mut outcome = RepoOutcome::new(&target, status);
        outcome.planned = planned;
        outcome.written = state.written.keys().cloned().collect();
        outcome.commit = state.commit;
        outcome.review = state.review;

        let flushed = self.flush(run_id, &target, &ledger).await;
        let outcome = match (result, flushed) {
            (Err(err), _) | (Ok(_), Err(err)) => failed(outcome, &target, err),
            (Ok(_), Ok(())) => outcome,
        };
        tracing::info!(repo = %target.id, status = ?outcome.status, written = outcome.written.len(), "unit finished");
        outcome
    }

    async fn apply(&self, run_id: &RunId, plan: &RepoPlan, state: &mut UnitState) -> Result<UnitStatus, ExecutionError> {
        let target = &plan.target;
        let review = self.options.mode == ApplyMode::Review;

        {
            let transport = self.transport.clone();
            let t = target.clone();
            self.step(Step::Prepare, move || {
                transport.prepare_workspace(&t).map_err(|source| ExecutionError::Transport { step: Step::Prepare, source })
            })
            .await?;
        }
        if self.cancel.is_cancelled() {
            return Ok(UnitStatus::Cancelled);
        }

        if review {
            let transport = self.transport.clone();
            let t = target.clone();
            let branch = self.options.branch.clone();
            self.step(Step::Checkout, move || {
                transport
                    .checkout_branch(&t, &branch)
                    .map_err(|source| ExecutionError::Transport { step: Step::Checkout, source })
            })
            .await?;
        }

        for item in plan.writes() {
            if self.cancel.is_cancelled() {
                return Ok(UnitStatus::Cancelled);
            }
            let content = plan
                .contents
                .get(&item.target_path)
                .cloned()
                .ok_or_else(|| ExecutionError::MissingContent { path: item.target_path.clone() })?;
            let root = target.path.clone();
            let it = item.clone();
            let hash = match self.step(Step::Write, move || write_change(&root, &it, &content)).await {
                Ok(hash) => hash,
                Err(err @ ExecutionError::Timeout { .. }) => {
                    note_late_write(target, item, state);
                    return Err(err);
                }
                Err(err) => return Err(err),
            };
            state.written.insert(item.target_path.clone(), hash);
        }
        if self.cancel.is_cancelled() {
            return Ok(UnitStatus::Cancelled);
        }

        {
            let transport = self.transport.clone();
            let t = target.clone();
            let paths: Vec<String> = state.written.keys().cloned().collect();
            let message = format!("chore: sync baseline files\n\nfleet run {run_id}");
            state.commit = self
                .step(Step::Commit, move || {
                    transport
                        .commit(&t, &paths, &message)
                        .map_err(|source| ExecutionError::Transport { step: Step::Commit, source })
                })
                .await?;
        }

        if review {
            let transport = self.transport.clone();
            let t = target.clone();
            let branch = self.options.branch.clone();
            state.review = Some(
                self.step(Step::OpenReview, move || {
                    transport
                        .open_review(&t, &branch)
                        .map_err(|source| ExecutionError::Transport { step: Step::OpenReview, source })
                })
                .await?,
            );
        }
        Ok(UnitStatus::Applied)
    }

    /// Run one blocking step on the blocking pool under the step timeout.
    async fn step<T, F>(&self, step: Step, f: F) -> Result<T, ExecutionError>
    where
        F: FnOnce() -> Result<T, ExecutionError> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = self.options.step_timeout;
        match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
            Err(_) => Err(ExecutionError::Timeout { step, secs: timeout.as_secs() }),
            Ok(Err(join)) => Err(ExecutionError::Join { step, message: join.to_string() }),
            Ok(Ok(result)) => result,
        }
    }

    async fn flush(&self, run_id: &RunId, target: &RepoTarget, ledger: &[AuditRecord]) -> Result<(), ExecutionError> {
        let audit = self.audit.clone();
        let run_id = run_id.clone();
        let t = target.clone();
        let ledger = ledger.to_vec();
        self.step(Step::Audit, move || audit.flush(&run_id, &t, &ledger).map_err(ExecutionError::Audit))
            .await
    }
}

// ---------------------------------------------------------------------------
// Per-unit bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct UnitState {
    /// target path → after-hash
    written: BTreeMap<String, String>,
    commit: Option<String>,
    review: Option<ReviewHandle>,
}

/// After a write timeout, record whatever already reached the target path.
fn note_late_write(target: &RepoTarget, item: &ChangeItem, state: &mut UnitState) {
    let path = target.path.join(&item.target_path);
    if let Ok(Some(hash)) = fsio::hash_file(&path) {
        if item.current_hash.as_ref() != Some(&hash) {
            state.written.insert(item.target_path.clone(), hash);
        }
    }
}

fn failed(mut outcome: RepoOutcome, target: &RepoTarget, err: ExecutionError) -> RepoOutcome {
    tracing::warn!(repo = %target.id, step = %err.step(), path = ?err.path(), error = %err, "unit failed");
    outcome.status = UnitStatus::Failed;
    outcome.failed_step = Some(err.step());
    outcome.failed_path = err.path().map(str::to_owned);
    outcome.error = Some(err.to_string());
    outcome
}

fn item_outcome(
    item: &ChangeItem,
    state: &UnitState,
    status: UnitStatus,
    dry_run: bool,
    error: Option<&str>,
) -> ItemOutcome {
    let unchanged = ItemOutcome {
        actual_action: Some(ChangeAction::Skip),
        result: AuditResult::Unchanged,
        error: None,
        after_hash: item.current_hash.clone(),
    };
    if dry_run {
        return ItemOutcome { actual_action: None, result: AuditResult::DryRun, ..unchanged };
    }
    if !item.action.is_write() {
        return unchanged;
    }

    let interrupted = error.map(str::to_owned).or_else(|| {
        (status == UnitStatus::Cancelled).then(|| "run cancelled before the sequence completed".to_string())
    });
    match (state.written.get(&item.target_path), status) {
        (Some(hash), UnitStatus::Applied) => ItemOutcome {
            actual_action: Some(item.action),
            result: AuditResult::Applied,
            error: None,
            after_hash: Some(hash.clone()),
        },
        // Written, but the sequence did not complete; the file stays.
        (Some(hash), _) => ItemOutcome {
            actual_action: Some(item.action),
            result: if status == UnitStatus::Failed { AuditResult::Failed } else { AuditResult::Interrupted },
            error: interrupted,
            after_hash: Some(hash.clone()),
        },
        (None, UnitStatus::Failed) => ItemOutcome {
            actual_action: None,
            result: AuditResult::Failed,
            error: interrupted,
            after_hash: item.current_hash.clone(),
        },
        (None, _) => ItemOutcome {
            actual_action: None,
            result: AuditResult::NotAttempted,
            error: interrupted,
            after_hash: item.current_hash.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::DecisionSource;
    use std::fs;
    use tempfile::TempDir;

    fn create(path: &str) -> ChangeItem {
        ChangeItem {
            target_path: path.to_string(),
            action: ChangeAction::Create,
            current_hash: None,
            new_hash: Some(fsio::content_hash("new\n")),
            reason: String::new(),
            decision_source: DecisionSource::Baseline,
        }
    }

    #[test]
    fn file_written_before_cancellation_is_interrupted_not_unattempted() {
        let mut state = UnitState::default();
        state.written.insert("SECURITY.md".into(), "h".into());

        let written = item_outcome(&create("SECURITY.md"), &state, UnitStatus::Cancelled, false, None);
        assert_eq!(written.result, AuditResult::Interrupted);
        assert_eq!(written.actual_action, Some(ChangeAction::Create));
        assert_eq!(written.after_hash.as_deref(), Some("h"));
        assert!(written.error.unwrap().contains("cancelled"));

        let pending = item_outcome(&create("README.md"), &state, UnitStatus::Cancelled, false, None);
        assert_eq!(pending.result, AuditResult::NotAttempted);
        assert_eq!(pending.actual_action, None);
        assert_eq!(pending.after_hash, None);
    }

    #[test]
    fn written_file_of_failed_unit_keeps_its_hash() {
        let mut state = UnitState::default();
        state.written.insert("SECURITY.md".into(), "h".into());
        let out = item_outcome(&create("SECURITY.md"), &state, UnitStatus::Failed, false, Some("commit failed"));
        assert_eq!(out.result, AuditResult::Failed);
        assert_eq!(out.after_hash.as_deref(), Some("h"));
        assert_eq!(out.error.as_deref(), Some("commit failed"));
    }

    #[test]
    fn late_write_after_timeout_is_recorded_with_disk_hash() {
        let tmp = TempDir::new().unwrap();
        let target = RepoTarget::from_path(tmp.path().to_path_buf(), None);
        let mut state = UnitState::default();

        note_late_write(&target, &create("SECURITY.md"), &mut state);
        assert!(state.written.is_empty(), "nothing on disk yet");

        fs::write(tmp.path().join("SECURITY.md"), "new\n").unwrap();
        note_late_write(&target, &create("SECURITY.md"), &mut state);
        assert_eq!(state.written.get("SECURITY.md"), Some(&fsio::content_hash("new\n")));
    }

    #[test]
    fn untouched_existing_file_is_not_recorded_after_timeout() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("SECURITY.md"), "old\n").unwrap();
        let target = RepoTarget::from_path(tmp.path().to_path_buf(), None);
        let mut item = create("SECURITY.md");
        item.action = ChangeAction::Update;
        item.current_hash = Some(fsio::content_hash("old\n"));

        let mut state = UnitState::default();
        note_late_write(&target, &item, &mut state);
        assert!(state.written.is_empty());
    }
}
