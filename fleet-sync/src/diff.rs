//! Unified diffs of what a plan would write, for `fleet diff`.

use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;
use similar::TextDiff;

use fleet_core::{fsio, ChangeAction};

use crate::error::{io_err, SyncError};
use crate::planner::RepoPlan;

/// A single rendered file diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub target_path: String,
    pub action: ChangeAction,
    pub unified_diff: String,
}

/// Compare every create/update item of `plan` with the file on disk.
///
/// No files are written.
pub fn diff_plan(plan: &RepoPlan) -> Result<Vec<FileDiff>, SyncError> {
    let mut diffs = Vec::new();
    for item in plan.writes() {
        let Some(rendered) = plan.contents.get(&item.target_path) else {
            continue;
        };
        // No current hash: missing, or not readable from inside the repository.
        let existing = match item.current_hash {
            Some(_) => read_existing_or_empty(&plan.target.path.join(&item.target_path))?,
            None => String::new(),
        };
        let rendered = fsio::normalize_line_endings(rendered);
        if existing == rendered {
            continue;
        }

        let old_header = match item.action {
            ChangeAction::Create => "/dev/null".to_string(),
            _ => format!("a/{}", item.target_path),
        };
        let new_header = format!("b/{}", item.target_path);
        let unified = TextDiff::from_lines(&existing, &rendered)
            .unified_diff()
            .header(&old_header, &new_header)
            .context_radius(3)
            .to_string();

        diffs.push(FileDiff {
            target_path: item.target_path.clone(),
            action: item.action,
            unified_diff: unified,
        });
    }
    Ok(diffs)
}

fn read_existing_or_empty(path: &Path) -> Result<String, SyncError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(fsio::normalize_line_endings(&String::from_utf8_lossy(&bytes))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(io_err(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{ChangeItem, ClassificationResult, DecisionSource, PlatformType, RepoTarget};
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    fn plan_for(root: &Path, action: ChangeAction, content: &str) -> RepoPlan {
        let mut contents = BTreeMap::new();
        contents.insert("README.md".to_string(), content.to_string());
        RepoPlan {
            target: RepoTarget::from_path(root.to_path_buf(), None),
            classification: ClassificationResult {
                platform_type: PlatformType::Generic,
                confidence: 50,
                indicators: vec![],
                metadata: BTreeMap::new(),
            },
            items: vec![ChangeItem {
                target_path: "README.md".into(),
                action,
                current_hash: fsio::hash_file(&root.join("README.md")).unwrap(),
                new_hash: Some(fsio::content_hash(content)),
                reason: String::new(),
                decision_source: DecisionSource::Baseline,
            }],
            contents,
            warnings: vec![],
        }
    }

    #[test]
    fn create_diffs_against_dev_null() {
        let dir = TempDir::new().unwrap();
        let diffs = diff_plan(&plan_for(dir.path(), ChangeAction::Create, "# hi\n")).unwrap();
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].unified_diff.contains("--- /dev/null"));
        assert!(diffs[0].unified_diff.contains("+# hi"));
    }

    #[test]
    fn local_edit_produces_unified_diff() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("README.md"), "# hi\nmanual tweak\n").unwrap();
        let diffs = diff_plan(&plan_for(dir.path(), ChangeAction::Update, "# hi\n")).unwrap();
        let d = &diffs[0].unified_diff;
        assert!(d.contains("--- a/README.md"));
        assert!(d.contains("+++ b/README.md"));
        assert!(d.contains("@@"));
        assert!(d.contains("-manual tweak"));
    }

    #[test]
    fn skip_items_and_crlf_only_changes_produce_no_diff() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("README.md"), "# hi\r\n").unwrap();
        assert!(diff_plan(&plan_for(dir.path(), ChangeAction::Update, "# hi\n")).unwrap().is_empty());
        assert!(diff_plan(&plan_for(dir.path(), ChangeAction::Skip, "other\n")).unwrap().is_empty());
    }
}
