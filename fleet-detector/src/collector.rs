//! Signal collection: scan one repository tree and emit weighted indicators
//! per candidate platform.
//!
//! Two evidence classes:
//! - *structural*: a descriptor file or directory exists (fixed weight);
//! - *content*: markers inside a candidate file, counted only once a
//!   minimum number of them match.
//!
//! Collection is best-effort below the root: unreadable or non-UTF-8 files
//! and broken walk entries are skipped. Only an unreadable root is an error.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use walkdir::WalkDir;

use fleet_core::{DetectorConfig, Indicator, PlatformType};

use crate::DetectError;

/// Files larger than this are never read for content evidence.
const MAX_CONTENT_BYTES: u64 = 1024 * 1024;

const JOOMLA_EXTENSION_TYPES: &[&str] = &[
    "component", "module", "plugin", "template", "library", "package", "language", "file",
];

/// (signal suffix, accepted directory names)
const JOOMLA_DIRS: &[(&str, &[&str])] = &[
    ("site", &["site"]),
    ("admin", &["admin", "administrator"]),
    ("media", &["media"]),
    ("language", &["language"]),
];

const DOLIBARR_MARKERS: &[&str] = &[
    "extends DolibarrModules",
    "$this->numero",
    "$this->rights_class",
    "$this->family",
    "$this->module_parts",
    "$this->version",
];

const DOLIBARR_DIRS: &[&str] = &["core/modules", "langs", "sql", "class"];

/// (signal suffix, case-insensitive root file prefixes)
const HYGIENE_FILES: &[(&str, &[&str])] = &[
    ("readme", &["readme"]),
    ("gitignore", &[".gitignore"]),
    ("license", &["license", "licence"]),
    ("changelog", &["changelog"]),
    ("contributing", &["contributing"]),
    ("editorconfig", &[".editorconfig"]),
];

const HYGIENE_DIRS: &[&str] = &["docs", ".github"];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Indicators grouped by platform, plus facts discovered along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evidence {
    pub by_platform: BTreeMap<PlatformType, Vec<Indicator>>,
    pub metadata: BTreeMap<String, String>,
}

impl Evidence {
    pub fn indicators(&self, platform: PlatformType) -> &[Indicator] {
        self.by_platform
            .get(&platform)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn push(&mut self, platform: PlatformType, indicator: Indicator) {
        self.by_platform.entry(platform).or_default().push(indicator);
    }
}

/// Relative file and directory listing of one repository.
#[derive(Debug, Clone, Default)]
pub struct RepoSnapshot {
    root: PathBuf,
    files: BTreeSet<String>,
    dirs: BTreeSet<String>,
}

impl RepoSnapshot {
    /// Walk `root` within the configured depth, skipping `skip_dirs` and
    /// any symlink that resolves outside the root.
    pub fn scan(root: &Path, config: &DetectorConfig) -> Result<Self, DetectError> {
        let meta = std::fs::metadata(root).map_err(|e| DetectError::unreadable(root, e))?;
        if !meta.is_dir() {
            return Err(DetectError::NotADirectory { path: root.to_path_buf() });
        }
        // Surface permission problems on the root itself.
        std::fs::read_dir(root).map_err(|e| DetectError::unreadable(root, e))?;
        let canonical_root = std::fs::canonicalize(root).map_err(|e| DetectError::unreadable(root, e))?;

        let mut snapshot = RepoSnapshot {
            root: root.to_path_buf(),
            ..Default::default()
        };

        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(config.max_depth.max(1))
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                !(e.file_type().is_dir()
                    && config
                        .skip_dirs
                        .iter()
                        .any(|skip| e.file_name().to_str() == Some(skip.as_str())))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!(root = %root.display(), error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            let Ok(rel) = entry.path().strip_prefix(root) else { continue };
            let rel = to_slash(rel);

            let file_type = entry.file_type();
            if file_type.is_dir() {
                snapshot.dirs.insert(rel);
            } else if file_type.is_file() {
                snapshot.files.insert(rel);
            } else if file_type.is_symlink() {
                // Links are never traversed; in-root links to files count as files.
                match std::fs::canonicalize(entry.path()) {
                    Ok(target) if target.starts_with(&canonical_root) && target.is_file() => {
                        snapshot.files.insert(rel);
                    }
                    Ok(_) => {
                        tracing::debug!(path = %entry.path().display(), "ignoring symlink outside repository root");
                    }
                    Err(_) => {}
                }
            }
        }

        Ok(snapshot)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn has_dir(&self, rel: &str) -> bool {
        self.dirs.contains(rel)
    }

    pub fn has_file(&self, rel: &str) -> bool {
        self.files.contains(rel)
    }

    /// Files directly under the root, in name order.
    pub fn root_files(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(String::as_str).filter(|f| !f.contains('/'))
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(String::as_str)
    }

    /// Best-effort UTF-8 read of a snapshot file; `None` on any failure.
    pub fn read_text(&self, rel: &str) -> Option<String> {
        let path = self.root.join(rel);
        let meta = std::fs::metadata(&path).ok()?;
        if meta.len() > MAX_CONTENT_BYTES {
            tracing::debug!(path = %path.display(), "skipping oversized file");
            return None;
        }
        match std::fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "skipping unparseable file");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Scan the repository at `root` and collect indicators for every platform.
pub fn collect_signals(root: &Path, config: &DetectorConfig) -> Result<Evidence, DetectError> {
    let snapshot = RepoSnapshot::scan(root, config)?;
    Ok(collect_from_snapshot(&snapshot, config))
}

/// Collect indicators from an already-scanned tree.
pub fn collect_from_snapshot(snapshot: &RepoSnapshot, config: &DetectorConfig) -> Evidence {
    let mut evidence = Evidence::default();
    joomla_signals(snapshot, config, &mut evidence);
    dolibarr_signals(snapshot, config, &mut evidence);
    hygiene_signals(snapshot, config, &mut evidence);
    evidence
}

// ---------------------------------------------------------------------------
// Platform collectors
// ---------------------------------------------------------------------------

fn joomla_signals(snapshot: &RepoSnapshot, config: &DetectorConfig, evidence: &mut Evidence) {
    let w = &config.weights;
    let platform = PlatformType::Joomla;

    let manifest = snapshot
        .root_files()
        .filter(|f| f.to_ascii_lowercase().ends_with(".xml"))
        .find_map(|f| {
            let text = snapshot.read_text(f)?;
            let attrs = extension_tag_re().captures(&text)?.get(1)?.as_str().to_string();
            Some((f.to_string(), text, attrs))
        });

    if let Some((file, text, attrs)) = manifest {
        evidence.push(
            platform,
            indicator("joomla.manifest", w.joomla_manifest, Some(&file), "XML extension manifest at repository root"),
        );
        evidence.metadata.insert("joomla.manifest".to_string(), file.clone());

        if let Some(kind) = attribute(&attrs, "type") {
            let kind = kind.to_ascii_lowercase();
            if JOOMLA_EXTENSION_TYPES.contains(&kind.as_str()) {
                evidence.push(
                    platform,
                    indicator(
                        "joomla.manifest_type",
                        w.joomla_manifest_type,
                        Some(&file),
                        &format!("manifest declares extension type '{kind}'"),
                    ),
                );
                evidence.metadata.insert("joomla.extension_type".to_string(), kind);
            }
        }

        // `<extension version=..>` names the target CMS release; only fall
        // back to it when the manifest has no `<version>` element.
        let version = version_element_re()
            .captures(&text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .or_else(|| attribute(&attrs, "version"));
        if let Some(version) = version.filter(|v| !v.is_empty()) {
            evidence.push(
                platform,
                indicator(
                    "joomla.version_tag",
                    w.joomla_version_tag,
                    Some(&file),
                    &format!("manifest carries version '{version}'"),
                ),
            );
            evidence.metadata.insert("joomla.version".to_string(), version);
        }
    }

    for (suffix, names) in JOOMLA_DIRS {
        if let Some(dir) = names.iter().find(|d| snapshot.has_dir(d)) {
            evidence.push(
                platform,
                indicator(
                    &format!("joomla.dir.{suffix}"),
                    w.joomla_directory,
                    Some(dir),
                    &format!("typical extension directory '{dir}/'"),
                ),
            );
        }
    }
}

fn dolibarr_signals(snapshot: &RepoSnapshot, config: &DetectorConfig, evidence: &mut Evidence) {
    let w = &config.weights;
    let platform = PlatformType::Dolibarr;

    let descriptors: Vec<&str> = snapshot
        .files()
        .filter(|f| {
            let name = f.rsplit('/').next().unwrap_or(f);
            descriptor_name_re().is_match(name)
        })
        .collect();

    if let Some(first) = descriptors.first() {
        evidence.push(
            platform,
            indicator("dolibarr.descriptor", w.dolibarr_descriptor, Some(first), "module descriptor class file"),
        );
        evidence.metadata.insert("dolibarr.descriptor".to_string(), first.to_string());
    }

    // Content evidence from the best-matching descriptor only.
    let best = descriptors
        .iter()
        .filter_map(|f| {
            let text = snapshot.read_text(f)?;
            let matched = DOLIBARR_MARKERS.iter().filter(|m| text.contains(*m)).count();
            Some((*f, matched))
        })
        .fold(None::<(&str, usize)>, |best, cur| match best {
            Some(b) if b.1 >= cur.1 => Some(b),
            _ => Some(cur),
        });

    if let Some((file, matched)) = best {
        if matched >= w.dolibarr_min_matches {
            evidence.push(
                platform,
                indicator(
                    "dolibarr.descriptor_content",
                    w.dolibarr_descriptor_match.saturating_mul(matched as u32),
                    Some(file),
                    &format!(
                        "descriptor matches {matched} of {} required markers",
                        DOLIBARR_MARKERS.len()
                    ),
                ),
            );
        } else {
            tracing::debug!(
                file,
                matched,
                required = w.dolibarr_min_matches,
                "descriptor markers below threshold"
            );
        }
    }

    for dir in DOLIBARR_DIRS {
        if snapshot.has_dir(dir) {
            evidence.push(
                platform,
                indicator(
                    &format!("dolibarr.dir.{}", dir.replace('/', "_")),
                    w.dolibarr_directory,
                    Some(dir),
                    &format!("typical module directory '{dir}/'"),
                ),
            );
        }
    }
}

fn hygiene_signals(snapshot: &RepoSnapshot, config: &DetectorConfig, evidence: &mut Evidence) {
    let weight = config.weights.generic_hygiene;
    let platform = PlatformType::Generic;

    for (suffix, prefixes) in HYGIENE_FILES {
        let found = snapshot.root_files().find(|f| {
            let lower = f.to_ascii_lowercase();
            prefixes.iter().any(|p| lower.starts_with(p))
        });
        if let Some(file) = found {
            evidence.push(
                platform,
                indicator(&format!("generic.{suffix}"), weight, Some(file), &format!("standard root file '{file}'")),
            );
        }
    }

    for dir in HYGIENE_DIRS {
        if snapshot.has_dir(dir) {
            evidence.push(
                platform,
                indicator(
                    &format!("generic.dir.{}", dir.trim_start_matches('.')),
                    weight,
                    Some(dir),
                    &format!("standard root directory '{dir}/'"),
                ),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn indicator(signal_id: &str, weight: u32, matched: Option<&str>, description: &str) -> Indicator {
    Indicator {
        signal_id: signal_id.to_string(),
        weight,
        matched_path: matched.map(PathBuf::from),
        description: description.to_string(),
    }
}

fn to_slash(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn attribute(attrs: &str, name: &str) -> Option<String> {
    attribute_re()
        .captures_iter(attrs)
        .find(|c| c.get(1).map(|m| m.as_str().eq_ignore_ascii_case(name)).unwrap_or(false))
        .and_then(|c| c.get(2))
        .map(|m| m.as_str().to_string())
}

fn extension_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<extension\b([^>]*)>").expect("static regex"))
}

fn attribute_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([A-Za-z_][\w-]*)\s*=\s*["']([^"']*)["']"#).expect("static regex"))
}

fn version_element_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<version>\s*([^<]+?)\s*</version>").expect("static regex"))
}

fn descriptor_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^mod[A-Z][A-Za-z0-9_]*\.class\.php$").expect("static regex"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, rel: &str, content: &str) {
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn attribute_lookup_is_case_insensitive() {
        assert_eq!(
            attribute(r#" Type="component" version='4.0'"#, "type").as_deref(),
            Some("component")
        );
        assert_eq!(attribute(r#" method="upgrade""#, "type"), None);
    }

    #[test]
    fn skip_dirs_are_not_descended() {
        let dir = TempDir::new().unwrap();
        write(&dir, "vendor/acme/core/modules/modX.class.php", "extends DolibarrModules");
        write(&dir, "README.md", "# x");
        let snap = RepoSnapshot::scan(dir.path(), &DetectorConfig::default()).unwrap();
        assert!(snap.has_file("README.md"));
        assert!(!snap.files().any(|f| f.starts_with("vendor")));
    }

    #[test]
    fn depth_limit_is_respected() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a/b/c/d/e/deep.txt", "x");
        let config = DetectorConfig { max_depth: 2, ..Default::default() };
        let snap = RepoSnapshot::scan(dir.path(), &config).unwrap();
        assert!(snap.has_dir("a/b"));
        assert!(!snap.has_dir("a/b/c"));
    }

    #[test]
    #[cfg(unix)]
    fn symlink_escaping_root_is_ignored() {
        let outside = TempDir::new().unwrap();
        write(&outside, "LICENSE", "MIT");
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path().join("LICENSE"), dir.path().join("LICENSE")).unwrap();
        write(&dir, "docs/LICENSE.txt", "MIT");
        std::os::unix::fs::symlink(dir.path().join("docs/LICENSE.txt"), dir.path().join("COPYING")).unwrap();

        let snap = RepoSnapshot::scan(dir.path(), &DetectorConfig::default()).unwrap();
        assert!(!snap.has_file("LICENSE"), "escaping link must not count");
        assert!(snap.has_file("COPYING"), "in-root link counts as a file");
    }

    #[test]
    fn non_utf8_manifest_is_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.xml"), [0xff, 0xfe, 0x00, 0x3c]).unwrap();
        let evidence = collect_signals(dir.path(), &DetectorConfig::default()).unwrap();
        assert!(evidence.indicators(PlatformType::Joomla).is_empty());
    }
}
