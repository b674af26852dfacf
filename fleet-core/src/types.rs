//! Domain types shared by every fleet crate.
//!
//! Repository-relative target paths are stored as forward-slash `String`s so
//! they sort and compare identically on every host; filesystem locations
//! (repository roots, matched evidence files) use `PathBuf`.
//! All types are serializable via serde.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for a governed repository.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepoId(pub String);

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RepoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RepoId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of a template source inside the template engine
/// (e.g. `joomla/ci.yml.tera`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceRef(pub String);

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SourceRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SourceRef {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier for one pipeline run; shared by every audit record it emits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Repository target
// ---------------------------------------------------------------------------

/// One repository working copy selected for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoTarget {
    pub id: RepoId,
    /// Root of the local working copy.
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
}

impl RepoTarget {
    /// Build a target whose identifier is the final path component.
    pub fn from_path(path: PathBuf, org: Option<String>) -> Self {
        let id = RepoId::from(
            path.file_name()
                .unwrap_or(path.as_os_str())
                .to_string_lossy()
                .into_owned(),
        );
        Self { id, path, org }
    }
}

// ---------------------------------------------------------------------------
// Platform types
// ---------------------------------------------------------------------------

/// Closed set of platform types a repository can be classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformType {
    /// Component-style extension described by an XML `<extension>` manifest.
    Joomla,
    /// Module-style package described by a `mod<Name>.class.php` descriptor.
    Dolibarr,
    /// Fallback when no specific platform reaches the acceptance threshold.
    Generic,
}

impl PlatformType {
    /// All platform types in evaluation priority order. The order is total:
    /// earlier entries win ties.
    pub fn priority_order() -> &'static [PlatformType] {
        &[PlatformType::Joomla, PlatformType::Dolibarr, PlatformType::Generic]
    }

    /// Platform types with their own evidence, excluding the fallback.
    pub fn specific() -> &'static [PlatformType] {
        &[PlatformType::Joomla, PlatformType::Dolibarr]
    }

    /// Position in [`PlatformType::priority_order`]; lower is evaluated first.
    pub fn priority(&self) -> usize {
        match self {
            PlatformType::Joomla => 0,
            PlatformType::Dolibarr => 1,
            PlatformType::Generic => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformType::Joomla => "joomla",
            PlatformType::Dolibarr => "dolibarr",
            PlatformType::Generic => "generic",
        }
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "joomla" => Ok(PlatformType::Joomla),
            "dolibarr" => Ok(PlatformType::Dolibarr),
            "generic" => Ok(PlatformType::Generic),
            other => Err(format!(
                "unknown platform type '{other}'; expected: joomla, dolibarr, generic"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// One weighted piece of evidence produced by the signal collector.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Indicator {
    pub signal_id: String,
    pub weight: u32,
    /// Repository-relative path of the evidence, when it came from a file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_path: Option<PathBuf>,
    pub description: String,
}

/// Outcome of classifying one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub platform_type: PlatformType,
    /// Aggregate score, `0..=100`.
    pub confidence: u8,
    pub indicators: Vec<Indicator>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Templates and overrides
// ---------------------------------------------------------------------------

/// One baseline entry: a file every repository of `platform_type` must carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMapping {
    /// Repository-relative, forward-slash target path.
    pub target_path: String,
    pub source_ref: SourceRef,
    pub platform_type: PlatformType,
    /// `true`: keep the file identical to the template. `false`: create only.
    pub always_overwrite: bool,
}

/// Per-repository override action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideAction {
    Exclude,
    Protect,
    Redirect(SourceRef),
}

impl OverrideAction {
    pub fn kind(&self) -> &'static str {
        match self {
            OverrideAction::Exclude => "exclude",
            OverrideAction::Protect => "protect",
            OverrideAction::Redirect(_) => "redirect",
        }
    }
}

/// A validated per-repository override declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRule {
    pub path: String,
    pub action: OverrideAction,
    #[serde(default)]
    pub reason: String,
}

/// Where the decision for an entry (and the audit record of its change) came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Baseline,
    Exclude,
    Protect,
    Redirect,
    DryRun,
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionSource::Baseline => "baseline",
            DecisionSource::Exclude => "exclude",
            DecisionSource::Protect => "protect",
            DecisionSource::Redirect => "redirect",
            DecisionSource::DryRun => "dry_run",
        };
        f.write_str(s)
    }
}

/// A baseline entry after overrides were applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveEntry {
    pub target_path: String,
    pub source_ref: SourceRef,
    pub platform_type: PlatformType,
    pub always_overwrite: bool,
    /// Existing files are never touched when set.
    pub protected: bool,
    pub decision_source: DecisionSource,
}

/// Baseline mapping with overrides folded in. Excluded paths are listed
/// separately so the planner can report them; they are never written.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EffectiveMapping {
    pub entries: Vec<EffectiveEntry>,
    pub excluded: Vec<String>,
}

impl EffectiveMapping {
    pub fn get(&self, target_path: &str) -> Option<&EffectiveEntry> {
        self.entries.iter().find(|e| e.target_path == target_path)
    }

    pub fn is_excluded(&self, target_path: &str) -> bool {
        self.excluded.iter().any(|p| p == target_path)
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Filesystem action planned for one target path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Skip,
}

impl ChangeAction {
    /// `true` for actions that write to the repository.
    pub fn is_write(&self) -> bool {
        !matches!(self, ChangeAction::Skip)
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Skip => "skip",
        };
        f.write_str(s)
    }
}

/// One planned action for one path in one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeItem {
    pub target_path: String,
    pub action: ChangeAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_hash: Option<String>,
    /// Hash of the rendered template; `None` for excluded paths.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_hash: Option<String>,
    pub reason: String,
    pub decision_source: DecisionSource,
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Whether a record was written before or after execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditPhase {
    Planned,
    Executed,
}

/// Outcome stored in an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Pending,
    Applied,
    Unchanged,
    DryRun,
    Failed,
    /// Written to the working copy, but the unit was cancelled before it
    /// committed.
    Interrupted,
    NotAttempted,
}

/// Immutable ledger entry for one change item execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub repo: RepoId,
    pub target_path: String,
    pub phase: AuditPhase,
    pub planned_action: ChangeAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_action: Option<ChangeAction>,
    pub decision_source: DecisionSource,
    pub result: AuditResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(RepoId::from("site-theme").to_string(), "site-theme");
        assert_eq!(SourceRef::from("shared/readme.md.tera").to_string(), "shared/readme.md.tera");
    }

    #[test]
    fn repo_target_id_is_directory_name() {
        let t = RepoTarget::from_path(PathBuf::from("/work/acme/com_widgets"), None);
        assert_eq!(t.id, RepoId::from("com_widgets"));
    }

    #[test]
    fn priority_order_is_total_and_matches_priority() {
        let order = PlatformType::priority_order();
        assert_eq!(order.len(), 3);
        for (i, p) in order.iter().enumerate() {
            assert_eq!(p.priority(), i);
        }
        assert_eq!(order.last(), Some(&PlatformType::Generic));
    }

    #[test]
    fn platform_type_parses_case_insensitively() {
        assert_eq!("Joomla".parse::<PlatformType>().unwrap(), PlatformType::Joomla);
        assert!("wordpress".parse::<PlatformType>().is_err());
    }

    #[test]
    fn change_action_serializes_lowercase() {
        let json = serde_json::to_string(&ChangeAction::Update).unwrap();
        assert_eq!(json, "\"update\"");
        assert!(ChangeAction::Create.is_write());
        assert!(!ChangeAction::Skip.is_write());
    }

    #[test]
    fn decision_source_display_matches_serde() {
        let json = serde_json::to_string(&DecisionSource::DryRun).unwrap();
        assert_eq!(json, format!("\"{}\"", DecisionSource::DryRun));
    }
}
