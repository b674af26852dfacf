//! Reconciliation planner.
//!
//! | always_overwrite | exists | hash differs | action |
//! |------------------|--------|--------------|--------|
//! | true             | no     | n/a          | create |
//! | true             | yes    | yes          | update |
//! | true             | yes    | no           | skip   |
//! | false            | no     | n/a          | create |
//! | false            | yes    | any          | skip   |
//! | excluded         | any    | any          | skip   |
//!
//! A protected entry behaves like `always_overwrite = false`. [`plan`] is
//! pure; [`current_hashes`] is the only part that reads the repository.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

use fleet_core::{
    fsio, ChangeAction, ChangeItem, ClassificationResult, DecisionSource, EffectiveMapping,
    RepoTarget,
};
use fleet_templates::OverrideWarning;

use crate::error::{io_err, SyncError};

pub const REASON_MISSING: &str = "missing from repository";
pub const REASON_DRIFTED: &str = "content differs from template";
pub const REASON_CURRENT: &str = "content matches template";
pub const REASON_CREATE_ONLY: &str = "exists; create-only file";
pub const REASON_PROTECTED: &str = "exists; protected by override";
pub const REASON_EXCLUDED: &str = "excluded by override";
pub const REASON_NOT_RENDERED: &str = "no rendered content";

/// Everything the executor needs for one repository.
#[derive(Debug, Clone)]
pub struct RepoPlan {
    pub target: RepoTarget,
    pub classification: ClassificationResult,
    /// Sorted by target path.
    pub items: Vec<ChangeItem>,
    /// Rendered content for every create/update item.
    pub contents: BTreeMap<String, String>,
    pub warnings: Vec<OverrideWarning>,
}

impl RepoPlan {
    pub fn writes(&self) -> impl Iterator<Item = &ChangeItem> {
        self.items.iter().filter(|i| i.action.is_write())
    }

    pub fn has_writes(&self) -> bool {
        self.writes().next().is_some()
    }
}

/// Hash every mapped or excluded path that currently exists under `root`.
///
/// Paths that resolve outside `root` are left unhashed; the writer refuses
/// them later.
pub fn current_hashes(
    root: &Path,
    mapping: &EffectiveMapping,
) -> Result<BTreeMap<String, String>, SyncError> {
    let paths = mapping
        .entries
        .iter()
        .map(|e| e.target_path.as_str())
        .chain(mapping.excluded.iter().map(String::as_str));

    let mut out = BTreeMap::new();
    for target in paths {
        let path = match fsio::resolve_within(root, target) {
            Ok(path) => path,
            Err(err) if err.kind() == ErrorKind::InvalidInput => {
                tracing::warn!(root = %root.display(), path = target, error = %err, "not hashing path outside the repository");
                continue;
            }
            Err(err) => return Err(io_err(root.join(target), err)),
        };
        if let Some(hash) = fsio::hash_file(&path).map_err(|e| io_err(&path, e))? {
            out.insert(target.to_string(), hash);
        }
    }
    Ok(out)
}

/// Decide create / update / skip for every path of `mapping`.
///
/// `desired` maps target path → hash of the rendered template; `current`
/// maps target path → hash of the file on disk (absent = file missing).
pub fn plan(
    mapping: &EffectiveMapping,
    desired: &BTreeMap<String, String>,
    current: &BTreeMap<String, String>,
) -> Vec<ChangeItem> {
    let mut items = Vec::with_capacity(mapping.entries.len() + mapping.excluded.len());

    for entry in &mapping.entries {
        let current_hash = current.get(&entry.target_path).cloned();
        let Some(new_hash) = desired.get(&entry.target_path).cloned() else {
            items.push(ChangeItem {
                target_path: entry.target_path.clone(),
                action: ChangeAction::Skip,
                current_hash,
                new_hash: None,
                reason: REASON_NOT_RENDERED.to_string(),
                decision_source: entry.decision_source,
            });
            continue;
        };

        let (action, reason) = match &current_hash {
            None => (ChangeAction::Create, REASON_MISSING),
            Some(_) if entry.protected => (ChangeAction::Skip, REASON_PROTECTED),
            Some(_) if !entry.always_overwrite => (ChangeAction::Skip, REASON_CREATE_ONLY),
            Some(hash) if *hash != new_hash => (ChangeAction::Update, REASON_DRIFTED),
            Some(_) => (ChangeAction::Skip, REASON_CURRENT),
        };

        items.push(ChangeItem {
            target_path: entry.target_path.clone(),
            action,
            current_hash,
            new_hash: Some(new_hash),
            reason: reason.to_string(),
            decision_source: entry.decision_source,
        });
    }

    for path in &mapping.excluded {
        items.push(ChangeItem {
            target_path: path.clone(),
            action: ChangeAction::Skip,
            current_hash: current.get(path).cloned(),
            new_hash: None,
            reason: REASON_EXCLUDED.to_string(),
            decision_source: DecisionSource::Exclude,
        });
    }

    items.sort_by(|a, b| a.target_path.cmp(&b.target_path));
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{EffectiveEntry, PlatformType, SourceRef};
    use rstest::rstest;

    fn entry(path: &str, always_overwrite: bool, protected: bool) -> EffectiveEntry {
        EffectiveEntry {
            target_path: path.to_string(),
            source_ref: SourceRef::from("x.tera"),
            platform_type: PlatformType::Generic,
            always_overwrite,
            protected,
            decision_source: if protected { DecisionSource::Protect } else { DecisionSource::Baseline },
        }
    }

    fn hashes(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[rstest]
    #[case(true, None, ChangeAction::Create)]
    #[case(true, Some("old"), ChangeAction::Update)]
    #[case(true, Some("new"), ChangeAction::Skip)]
    #[case(false, None, ChangeAction::Create)]
    #[case(false, Some("old"), ChangeAction::Skip)]
    #[case(false, Some("new"), ChangeAction::Skip)]
    fn decision_table(
        #[case] always_overwrite: bool,
        #[case] on_disk: Option<&str>,
        #[case] expected: ChangeAction,
    ) {
        let mapping = EffectiveMapping { entries: vec![entry("f", always_overwrite, false)], excluded: vec![] };
        let current = match on_disk {
            Some(h) => hashes(&[("f", h)]),
            None => BTreeMap::new(),
        };
        let items = plan(&mapping, &hashes(&[("f", "new")]), &current);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].action, expected);
        assert_eq!(items[0].current_hash.as_deref(), on_disk);
    }

    #[test]
    fn protect_beats_always_overwrite_only_when_file_exists() {
        let mapping = EffectiveMapping {
            entries: vec![entry("present", true, true), entry("absent", true, true)],
            excluded: vec![],
        };
        let items = plan(
            &mapping,
            &hashes(&[("present", "new"), ("absent", "new")]),
            &hashes(&[("present", "old")]),
        );
        assert_eq!(items[0].target_path, "absent");
        assert_eq!(items[0].action, ChangeAction::Create);
        assert_eq!(items[1].action, ChangeAction::Skip);
        assert_eq!(items[1].reason, REASON_PROTECTED);
        assert_eq!(items[1].decision_source, DecisionSource::Protect);
    }

    #[test]
    fn excluded_paths_are_skipped_whatever_their_state() {
        let mapping = EffectiveMapping { entries: vec![], excluded: vec!["ci.yml".into()] };
        let items = plan(&mapping, &BTreeMap::new(), &hashes(&[("ci.yml", "drifted")]));
        assert_eq!(items[0].action, ChangeAction::Skip);
        assert_eq!(items[0].decision_source, DecisionSource::Exclude);
        assert!(items[0].new_hash.is_none());
    }

    #[test]
    fn replanning_after_apply_is_all_skips() {
        let mapping = EffectiveMapping {
            entries: vec![entry("a", true, false), entry("b", false, false)],
            excluded: vec!["c".into()],
        };
        let desired = hashes(&[("a", "ha"), ("b", "hb")]);
        let first = plan(&mapping, &desired, &BTreeMap::new());
        assert_eq!(first.iter().filter(|i| i.action.is_write()).count(), 2);

        let after: BTreeMap<String, String> = first
            .iter()
            .filter_map(|i| Some((i.target_path.clone(), i.new_hash.clone()?)))
            .collect();
        let second = plan(&mapping, &desired, &after);
        assert!(second.iter().all(|i| i.action == ChangeAction::Skip));
        assert_eq!(plan(&mapping, &desired, &after), second);
    }

    #[test]
    fn current_hashes_reads_only_existing_files() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a"), "x\r\n").unwrap();
        let mapping = EffectiveMapping {
            entries: vec![entry("a", true, false), entry("b", true, false)],
            excluded: vec![],
        };
        let current = current_hashes(dir.path(), &mapping).unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current["a"], fsio::content_hash("x\n"));
    }
}
