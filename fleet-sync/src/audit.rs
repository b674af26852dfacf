//! Audit ledger.
//!
//! Each repository gets its own ledger per run. Records are only ever
//! appended; every flush rewrites the repository's JSONL file atomically with
//! the full ledger and fsyncs it, so a crash loses at most the records that
//! were never flushed and never leaves a torn line.
//!
//! Layout: `<state>/audit/<run_id>/<repo_key>.jsonl`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use fleet_core::{
    fsio, AuditPhase, AuditRecord, AuditResult, ChangeItem, DecisionSource, RepoId, RepoTarget, RunId,
};

use crate::error::{io_err, SyncError};

/// Fresh identifier for one pipeline run.
pub fn new_run_id() -> RunId {
    RunId(Uuid::new_v4().to_string())
}

/// File-name-safe key for `target`: its id plus a short hash of its path, so
/// same-named repositories from different organisations never share a ledger.
pub fn repo_key(target: &RepoTarget) -> String {
    let safe: String = target
        .id
        .0
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    let path_hash = fsio::sha256_hex(target.path.to_string_lossy().as_bytes());
    format!("{safe}-{}", &path_hash[..8])
}

/// Durable destination for audit ledgers.
pub trait AuditSink: Send + Sync {
    /// Persist `ledger`, the complete record list of `target` for `run_id`
    /// so far. Must not return before the records are durable.
    fn flush(&self, run_id: &RunId, target: &RepoTarget, ledger: &[AuditRecord]) -> Result<(), SyncError>;
}

// ---------------------------------------------------------------------------
// Record builders
// ---------------------------------------------------------------------------

fn tag(source: DecisionSource, dry_run: bool) -> DecisionSource {
    if dry_run {
        DecisionSource::DryRun
    } else {
        source
    }
}

/// Record written before any side effect.
pub fn planned_record(run_id: &RunId, repo: &RepoId, item: &ChangeItem, dry_run: bool) -> AuditRecord {
    AuditRecord {
        run_id: run_id.clone(),
        timestamp: Utc::now(),
        repo: repo.clone(),
        target_path: item.target_path.clone(),
        phase: AuditPhase::Planned,
        planned_action: item.action,
        actual_action: None,
        decision_source: tag(item.decision_source, dry_run),
        result: if dry_run { AuditResult::DryRun } else { AuditResult::Pending },
        error: None,
        before_hash: item.current_hash.clone(),
        after_hash: None,
    }
}

/// What actually happened to one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub actual_action: Option<fleet_core::ChangeAction>,
    pub result: AuditResult,
    pub error: Option<String>,
    pub after_hash: Option<String>,
}

/// Record written after the apply sequence ends.
pub fn executed_record(
    run_id: &RunId,
    repo: &RepoId,
    item: &ChangeItem,
    outcome: ItemOutcome,
    dry_run: bool,
) -> AuditRecord {
    AuditRecord {
        run_id: run_id.clone(),
        timestamp: Utc::now(),
        repo: repo.clone(),
        target_path: item.target_path.clone(),
        phase: AuditPhase::Executed,
        planned_action: item.action,
        actual_action: outcome.actual_action,
        decision_source: tag(item.decision_source, dry_run),
        result: outcome.result,
        error: outcome.error,
        before_hash: item.current_hash.clone(),
        after_hash: outcome.after_hash,
    }
}

// ---------------------------------------------------------------------------
// JSONL sink
// ---------------------------------------------------------------------------

/// One JSONL file per repository per run.
#[derive(Debug, Clone)]
pub struct JsonlAuditSink {
    dir: PathBuf,
}

impl JsonlAuditSink {
    /// `dir` is the audit root (`<state>/audit`).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn ledger_path(&self, run_id: &RunId, target: &RepoTarget) -> PathBuf {
        self.dir.join(&run_id.0).join(format!("{}.jsonl", repo_key(target)))
    }

    /// Read back a ledger file.
    pub fn read_ledger(path: &Path) -> Result<Vec<AuditRecord>, SyncError> {
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(SyncError::from))
            .collect()
    }
}

impl AuditSink for JsonlAuditSink {
    fn flush(&self, run_id: &RunId, target: &RepoTarget, ledger: &[AuditRecord]) -> Result<(), SyncError> {
        let path = self.ledger_path(run_id, target);
        let mut buf = Vec::new();
        for record in ledger {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }
        fsio::write_atomic(&path, &buf).map_err(|e| io_err(&path, e))?;
        tracing::debug!(repo = %target.id, path = %path.display(), records = ledger.len(), "audit flushed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory sink
// ---------------------------------------------------------------------------

/// Keeps the latest flushed ledger per repository key.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    ledgers: Mutex<BTreeMap<String, Vec<AuditRecord>>>,
    flushes: Mutex<usize>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flushed records of `target`, in append order.
    pub fn records(&self, target: &RepoTarget) -> Vec<AuditRecord> {
        self.ledgers
            .lock()
            .map(|l| l.get(&repo_key(target)).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.lock().map(|n| *n).unwrap_or(0)
    }
}

impl AuditSink for MemoryAuditSink {
    fn flush(&self, _run_id: &RunId, target: &RepoTarget, ledger: &[AuditRecord]) -> Result<(), SyncError> {
        let mut ledgers = self.ledgers.lock().map_err(|_| poisoned())?;
        ledgers.insert(repo_key(target), ledger.to_vec());
        *self.flushes.lock().map_err(|_| poisoned())? += 1;
        Ok(())
    }
}

fn poisoned() -> SyncError {
    io_err("<memory audit sink>", std::io::Error::other("lock poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::ChangeAction;
    use tempfile::TempDir;

    fn item() -> ChangeItem {
        ChangeItem {
            target_path: "README.md".into(),
            action: ChangeAction::Create,
            current_hash: None,
            new_hash: Some("abc".into()),
            reason: "missing from repository".into(),
            decision_source: DecisionSource::Baseline,
        }
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(new_run_id(), new_run_id());
    }

    #[test]
    fn repo_key_is_filename_safe_and_path_specific() {
        let a = RepoTarget::from_path(PathBuf::from("/w/acme/my repo"), None);
        let b = RepoTarget::from_path(PathBuf::from("/w/other/my repo"), None);
        assert!(repo_key(&a).starts_with("my_repo-"));
        assert_ne!(repo_key(&a), repo_key(&b));
    }

    #[test]
    fn dry_run_records_are_tagged() {
        let run = RunId::from("r");
        let rec = planned_record(&run, &RepoId::from("x"), &item(), true);
        assert_eq!(rec.decision_source, DecisionSource::DryRun);
        assert_eq!(rec.result, AuditResult::DryRun);
        let rec = planned_record(&run, &RepoId::from("x"), &item(), false);
        assert_eq!(rec.decision_source, DecisionSource::Baseline);
        assert_eq!(rec.result, AuditResult::Pending);
    }

    #[test]
    fn jsonl_flush_rewrites_full_ledger() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlAuditSink::new(dir.path());
        let run = new_run_id();
        let target = RepoTarget::from_path(dir.path().join("repo"), None);

        let mut ledger = vec![planned_record(&run, &target.id, &item(), false)];
        sink.flush(&run, &target, &ledger).unwrap();
        ledger.push(executed_record(
            &run,
            &target.id,
            &item(),
            ItemOutcome {
                actual_action: Some(ChangeAction::Create),
                result: AuditResult::Applied,
                error: None,
                after_hash: Some("abc".into()),
            },
            false,
        ));
        sink.flush(&run, &target, &ledger).unwrap();

        let path = sink.ledger_path(&run, &target);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
        let back = JsonlAuditSink::read_ledger(&path).unwrap();
        assert_eq!(back, ledger);
        assert!(!fsio::tmp_path_for(&path).exists());
    }

    #[test]
    fn memory_sink_keeps_latest_ledger() {
        let sink = MemoryAuditSink::new();
        let run = new_run_id();
        let target = RepoTarget::from_path(PathBuf::from("/w/a"), None);
        let rec = planned_record(&run, &target.id, &item(), false);
        sink.flush(&run, &target, &[rec.clone()]).unwrap();
        sink.flush(&run, &target, &[rec.clone(), rec]).unwrap();
        assert_eq!(sink.records(&target).len(), 2);
        assert_eq!(sink.flush_count(), 2);
    }
}
