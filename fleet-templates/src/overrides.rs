//! Per-repository override declarations and the precedence fold.
//!
//! Declarations live in `<repo>/.fleet/overrides.yaml`:
//!
//! ```yaml
//! overrides:
//!   - path: .github/workflows/ci.yml
//!     action: exclude
//!     reason: CI lives in the monorepo
//!   - path: README.md
//!     action: redirect
//!     source: shared/readme-internal.md.tera
//! ```
//!
//! Rules are folded in declaration order into a map keyed by target path, so
//! the last rule for a path wins. Precedence against the baseline, high to
//! low: `exclude` > `redirect` > `protect` > baseline `always_overwrite` >
//! baseline create-if-absent.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use fleet_core::config::FLEET_DIR;
use fleet_core::error::config_io_err;
use fleet_core::{
    fsio, ConfigError, DecisionSource, EffectiveEntry, EffectiveMapping, OverrideAction,
    OverrideRule, SourceRef, TemplateMapping,
};

use crate::error::PlanningError;

pub const OVERRIDES_FILE: &str = "overrides.yaml";

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOverrides {
    #[serde(default)]
    overrides: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    path: String,
    action: RawAction,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawAction {
    Exclude,
    Protect,
    Redirect,
}

/// `<repo>/.fleet/overrides.yaml`
pub fn overrides_path(repo_root: &Path) -> PathBuf {
    repo_root.join(FLEET_DIR).join(OVERRIDES_FILE)
}

/// Load the override declarations of the repository at `repo_root`.
///
/// A missing or empty file means no overrides.
pub fn load_overrides(repo_root: &Path) -> Result<Vec<OverrideRule>, ConfigError> {
    let path = overrides_path(repo_root);
    match std::fs::read_to_string(&path) {
        Ok(contents) => parse_overrides(&contents, &path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(config_io_err(&path, e)),
    }
}

/// Parse override declarations; `origin` only labels errors.
pub fn parse_overrides(yaml: &str, origin: &Path) -> Result<Vec<OverrideRule>, ConfigError> {
    if yaml.trim().is_empty() {
        return Ok(Vec::new());
    }
    let raw: RawOverrides = serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
        path: origin.to_path_buf(),
        source,
    })?;

    raw.overrides
        .into_iter()
        .enumerate()
        .map(|(idx, rule)| {
            let action = match (rule.action, rule.source) {
                (RawAction::Redirect, Some(source)) if !source.trim().is_empty() => {
                    OverrideAction::Redirect(SourceRef::from(source))
                }
                (RawAction::Redirect, _) => {
                    return Err(ConfigError::invalid(
                        origin,
                        format!("override #{} for '{}': redirect requires a source", idx + 1, rule.path),
                    ))
                }
                (RawAction::Exclude | RawAction::Protect, Some(_)) => {
                    return Err(ConfigError::invalid(
                        origin,
                        format!("override #{} for '{}': only redirect takes a source", idx + 1, rule.path),
                    ))
                }
                (RawAction::Exclude, None) => OverrideAction::Exclude,
                (RawAction::Protect, None) => OverrideAction::Protect,
            };
            Ok(OverrideRule {
                path: rule.path,
                action,
                reason: rule.reason.unwrap_or_default(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Non-fatal problems found while applying overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OverrideWarning {
    /// Several rules target one path; only `winner` applies.
    Conflict {
        path: String,
        discarded: String,
        winner: String,
    },
    /// Rule path is not part of the baseline.
    Unmatched { path: String, action: String },
    /// Overrides could not be applied; the baseline is used unchanged.
    Fallback { message: String },
}

impl fmt::Display for OverrideWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideWarning::Conflict { path, discarded, winner } => write!(
                f,
                "conflicting overrides for '{path}': '{winner}' declared last replaces '{discarded}'"
            ),
            OverrideWarning::Unmatched { path, action } => {
                write!(f, "{action} override for '{path}' ignored: path is not in the baseline")
            }
            OverrideWarning::Fallback { message } => {
                write!(f, "overrides ignored, using baseline: {message}")
            }
        }
    }
}

/// Effective mapping plus the warnings raised while building it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    pub mapping: EffectiveMapping,
    pub warnings: Vec<OverrideWarning>,
}

fn describe(action: &OverrideAction) -> String {
    match action {
        OverrideAction::Redirect(source) => format!("redirect -> {source}"),
        other => other.kind().to_string(),
    }
}

fn baseline_entry(mapping: &TemplateMapping) -> EffectiveEntry {
    EffectiveEntry {
        target_path: fsio::normalize_target(&mapping.target_path),
        source_ref: mapping.source_ref.clone(),
        platform_type: mapping.platform_type,
        always_overwrite: mapping.always_overwrite,
        protected: false,
        decision_source: DecisionSource::Baseline,
    }
}

/// Baseline with no overrides applied. Entries are sorted by target path.
pub fn baseline_mapping(baseline: &[TemplateMapping]) -> EffectiveMapping {
    let mut entries: Vec<EffectiveEntry> = baseline.iter().map(baseline_entry).collect();
    entries.sort_by(|a, b| a.target_path.cmp(&b.target_path));
    EffectiveMapping { entries, excluded: Vec::new() }
}

/// Fold `rules` over `baseline`.
///
/// `known_source` decides whether a redirect target can be rendered.
pub fn apply_overrides(
    baseline: &[TemplateMapping],
    rules: &[OverrideRule],
    known_source: impl Fn(&SourceRef) -> bool,
) -> Result<Resolution, PlanningError> {
    let mut warnings = Vec::new();

    // Last declaration wins.
    let mut winning: BTreeMap<String, &OverrideRule> = BTreeMap::new();
    for rule in rules {
        if !fsio::is_contained_relative(&rule.path) {
            return Err(PlanningError::InvalidPath { path: rule.path.clone() });
        }
        let path = fsio::normalize_target(&rule.path);
        if let OverrideAction::Redirect(source) = &rule.action {
            if !known_source(source) {
                return Err(PlanningError::UnknownSource {
                    path,
                    source_ref: source.0.clone(),
                });
            }
        }
        if let Some(previous) = winning.insert(path.clone(), rule) {
            if previous.action != rule.action {
                warnings.push(OverrideWarning::Conflict {
                    path,
                    discarded: describe(&previous.action),
                    winner: describe(&rule.action),
                });
            }
        }
    }

    let baseline_paths: BTreeSet<String> = baseline
        .iter()
        .map(|m| fsio::normalize_target(&m.target_path))
        .collect();
    for (path, rule) in &winning {
        if !baseline_paths.contains(path) {
            warnings.push(OverrideWarning::Unmatched {
                path: path.clone(),
                action: rule.action.kind().to_string(),
            });
        }
    }

    let mut mapping = EffectiveMapping::default();
    for base in baseline {
        let mut entry = baseline_entry(base);
        match winning.get(&entry.target_path).map(|r| &r.action) {
            Some(OverrideAction::Exclude) => {
                mapping.excluded.push(entry.target_path);
                continue;
            }
            Some(OverrideAction::Redirect(source)) => {
                entry.source_ref = source.clone();
                entry.decision_source = DecisionSource::Redirect;
            }
            Some(OverrideAction::Protect) => {
                entry.protected = true;
                entry.decision_source = DecisionSource::Protect;
            }
            None => {}
        }
        mapping.entries.push(entry);
    }
    mapping.entries.sort_by(|a, b| a.target_path.cmp(&b.target_path));
    mapping.excluded.sort();

    Ok(Resolution { mapping, warnings })
}

/// [`apply_overrides`], degrading a [`PlanningError`] to a warning and the
/// unmodified baseline.
pub fn resolve_effective(
    baseline: &[TemplateMapping],
    rules: &[OverrideRule],
    known_source: impl Fn(&SourceRef) -> bool,
) -> Resolution {
    match apply_overrides(baseline, rules, known_source) {
        Ok(resolution) => resolution,
        Err(err) => Resolution {
            mapping: baseline_mapping(baseline),
            warnings: vec![OverrideWarning::Fallback { message: err.to_string() }],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::PlatformType;
    use tempfile::TempDir;

    fn mapping(target: &str, always_overwrite: bool) -> TemplateMapping {
        TemplateMapping {
            target_path: target.to_string(),
            source_ref: SourceRef::from(format!("generic/{target}.tera")),
            platform_type: PlatformType::Generic,
            always_overwrite,
        }
    }

    fn rule(path: &str, action: OverrideAction) -> OverrideRule {
        OverrideRule { path: path.to_string(), action, reason: String::new() }
    }

    fn any_source(_: &SourceRef) -> bool {
        true
    }

    #[test]
    fn no_rules_is_the_sorted_baseline() {
        let baseline = [mapping("z.md", false), mapping("a.md", true)];
        let resolution = apply_overrides(&baseline, &[], any_source).unwrap();
        assert_eq!(resolution.mapping, baseline_mapping(&baseline));
        assert_eq!(resolution.mapping.entries[0].target_path, "a.md");
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn protect_marks_entry_and_keeps_source() {
        let baseline = [mapping("SECURITY.md", true)];
        let resolution =
            apply_overrides(&baseline, &[rule("SECURITY.md", OverrideAction::Protect)], any_source).unwrap();
        let entry = resolution.mapping.get("SECURITY.md").unwrap();
        assert!(entry.protected);
        assert!(entry.always_overwrite);
        assert_eq!(entry.decision_source, DecisionSource::Protect);
    }

    #[test]
    fn redirect_swaps_source() {
        let baseline = [mapping("README.md", false)];
        let rules = [rule("./README.md", OverrideAction::Redirect(SourceRef::from("custom.tera")))];
        let resolution = apply_overrides(&baseline, &rules, any_source).unwrap();
        let entry = resolution.mapping.get("README.md").unwrap();
        assert_eq!(entry.source_ref, SourceRef::from("custom.tera"));
        assert_eq!(entry.decision_source, DecisionSource::Redirect);
    }

    #[test]
    fn last_declared_rule_wins_with_warning() {
        let baseline = [mapping("ci.yml", true)];
        let rules = [
            rule("ci.yml", OverrideAction::Exclude),
            rule("ci.yml", OverrideAction::Protect),
        ];
        let resolution = apply_overrides(&baseline, &rules, any_source).unwrap();
        assert!(!resolution.mapping.is_excluded("ci.yml"));
        assert!(resolution.mapping.get("ci.yml").unwrap().protected);
        assert_eq!(resolution.warnings.len(), 1);
        assert!(matches!(
            &resolution.warnings[0],
            OverrideWarning::Conflict { winner, .. } if winner == "protect"
        ));
    }

    #[test]
    fn repeated_identical_rule_is_not_a_conflict() {
        let baseline = [mapping("ci.yml", true)];
        let rules = [rule("ci.yml", OverrideAction::Exclude), rule("ci.yml", OverrideAction::Exclude)];
        let resolution = apply_overrides(&baseline, &rules, any_source).unwrap();
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn unmatched_rule_is_ignored_with_warning() {
        let baseline = [mapping("README.md", false)];
        let resolution =
            apply_overrides(&baseline, &[rule("docs/x.md", OverrideAction::Exclude)], any_source).unwrap();
        assert_eq!(resolution.mapping, baseline_mapping(&baseline));
        assert!(matches!(&resolution.warnings[0], OverrideWarning::Unmatched { path, .. } if path == "docs/x.md"));
    }

    #[test]
    fn invalid_path_and_unknown_source_fall_back_to_baseline() {
        let baseline = [mapping("README.md", false)];

        let err = apply_overrides(&baseline, &[rule("../x", OverrideAction::Exclude)], any_source).unwrap_err();
        assert!(matches!(err, PlanningError::InvalidPath { .. }));

        let rules = [
            rule("README.md", OverrideAction::Exclude),
            rule("README.md", OverrideAction::Redirect(SourceRef::from("missing.tera"))),
        ];
        let resolution = resolve_effective(&baseline, &rules, |_| false);
        assert_eq!(resolution.mapping, baseline_mapping(&baseline));
        assert!(matches!(&resolution.warnings[0], OverrideWarning::Fallback { message } if message.contains("missing.tera")));
    }

    #[test]
    fn load_missing_and_empty_files_yield_no_rules() {
        let repo = TempDir::new().unwrap();
        assert!(load_overrides(repo.path()).unwrap().is_empty());
        std::fs::create_dir_all(repo.path().join(FLEET_DIR)).unwrap();
        std::fs::write(overrides_path(repo.path()), "\n").unwrap();
        assert!(load_overrides(repo.path()).unwrap().is_empty());
    }

    #[test]
    fn parse_reads_all_actions_in_order() {
        let yaml = "overrides:\n  - {path: a, action: exclude, reason: not needed}\n  - {path: b, action: protect}\n  - {path: c, action: redirect, source: x.tera}\n";
        let rules = parse_overrides(yaml, Path::new("o.yaml")).unwrap();
        assert_eq!(rules[0].action, OverrideAction::Exclude);
        assert_eq!(rules[0].reason, "not needed");
        assert_eq!(rules[1].action, OverrideAction::Protect);
        assert_eq!(rules[2].action, OverrideAction::Redirect(SourceRef::from("x.tera")));
    }

    #[test]
    fn redirect_without_source_is_a_config_error() {
        let err = parse_overrides("overrides:\n  - {path: a, action: redirect}\n", Path::new("o.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("requires a source"));
    }

    #[test]
    fn unknown_action_is_a_parse_error() {
        let err = parse_overrides("overrides:\n  - {path: a, action: delete}\n", Path::new("o.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
