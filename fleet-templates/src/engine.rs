//! Tera rendering engine for baseline template sources.
//!
//! Built-in sources are compiled into the binary. A user template directory
//! may overlay any of them: a file at `<dir>/joomla/ci.yml.tera` replaces the
//! built-in `joomla/ci.yml.tera`, and new names become available to a user
//! catalogue.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use tera::Tera;
use walkdir::WalkDir;

use fleet_core::{fsio, EffectiveMapping, SourceRef};

use crate::context::RenderContext;
use crate::error::TemplateError;

// ---------------------------------------------------------------------------
// Embedded templates: baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("shared/readme.md.tera", include_str!("templates/shared/readme.md.tera")),
    ("shared/security.md.tera", include_str!("templates/shared/security.md.tera")),
    ("shared/editorconfig.tera", include_str!("templates/shared/editorconfig.tera")),
    (
        "shared/contributing.md.tera",
        include_str!("templates/shared/contributing.md.tera"),
    ),
    ("joomla/gitignore.tera", include_str!("templates/joomla/gitignore.tera")),
    ("joomla/ci.yml.tera", include_str!("templates/joomla/ci.yml.tera")),
    ("dolibarr/gitignore.tera", include_str!("templates/dolibarr/gitignore.tera")),
    ("dolibarr/ci.yml.tera", include_str!("templates/dolibarr/ci.yml.tera")),
    ("generic/ci.yml.tera", include_str!("templates/generic/ci.yml.tera")),
];

// ---------------------------------------------------------------------------
// Template sources
// ---------------------------------------------------------------------------

/// Where a loaded template came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateOrigin {
    Builtin,
    /// User file replacing a built-in of the same name.
    Overlay,
    /// User file with no built-in counterpart.
    User,
}

/// Lowercase, forward-slash name of a template relative to its root.
fn template_name(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_lowercase()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Template text keyed by name, before Tera parses it.
#[derive(Default)]
struct SourceSet {
    sources: BTreeMap<String, (TemplateOrigin, String)>,
}

impl SourceSet {
    fn builtin() -> Self {
        let sources = TPLS
            .iter()
            .map(|(name, text)| (template_name(Path::new(name)), (TemplateOrigin::Builtin, (*text).to_string())))
            .collect();
        Self { sources }
    }

    /// Layer every `*.tera` file under `dir` over the current set. Symlinks
    /// are not followed; a missing directory adds nothing.
    fn overlay_dir(&mut self, dir: &Path) -> Result<(), TemplateError> {
        if !dir.exists() {
            return Ok(());
        }
        for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| walk_err(dir, e))?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().and_then(|s| s.to_str()) != Some("tera") {
                continue;
            }
            let name = template_name(path.strip_prefix(dir).unwrap_or(path));
            let text = std::fs::read_to_string(path)
                .map_err(|source| TemplateError::Io { path: path.to_path_buf(), source })?;
            let origin = match self.sources.get(&name) {
                Some((TemplateOrigin::Builtin, _)) => TemplateOrigin::Overlay,
                Some((origin, _)) => *origin,
                None => TemplateOrigin::User,
            };
            tracing::debug!(template = %name, ?origin, "user template loaded");
            self.sources.insert(name, (origin, text));
        }
        Ok(())
    }

    fn into_tera(self) -> Result<(Tera, BTreeMap<String, TemplateOrigin>), TemplateError> {
        let mut origins = BTreeMap::new();
        let mut raw = Vec::with_capacity(self.sources.len());
        for (name, (origin, text)) in self.sources {
            origins.insert(name.clone(), origin);
            raw.push((name, text));
        }
        let mut tera = Tera::default();
        tera.add_raw_templates(raw)?;
        Ok((tera, origins))
    }
}

fn walk_err(dir: &Path, err: walkdir::Error) -> TemplateError {
    let path = err.path().unwrap_or(dir).to_path_buf();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other("filesystem loop in template directory"));
    TemplateError::Io { path, source }
}

// ---------------------------------------------------------------------------
// Rendered output
// ---------------------------------------------------------------------------

/// Desired content of one target path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub target_path: String,
    pub source_ref: SourceRef,
    /// LF-normalised content.
    pub content: String,
    /// SHA-256 of `content`.
    pub hash: String,
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Tera-based engine for rendering template sources with optional user overlays.
///
/// Template names are normalised to lowercase, forward-slash relative paths.
pub struct TemplateEngine {
    tera: Tera,
    origins: BTreeMap<String, TemplateOrigin>,
}

impl TemplateEngine {
    /// Load embedded templates plus any overlays found in `user_template_dir`.
    pub fn new(user_template_dir: Option<&Path>) -> Result<Self, TemplateError> {
        let mut sources = SourceSet::builtin();
        if let Some(dir) = user_template_dir {
            sources.overlay_dir(dir)?;
        }
        let (tera, origins) = sources.into_tera()?;
        Ok(TemplateEngine { tera, origins })
    }

    pub fn has_template(&self, source: &SourceRef) -> bool {
        self.origin(source).is_some()
    }

    pub fn origin(&self, source: &SourceRef) -> Option<TemplateOrigin> {
        self.origins.get(&template_name(Path::new(&source.0))).copied()
    }

    /// Sorted names of every loaded template.
    pub fn template_names(&self) -> Vec<String> {
        self.origins.keys().cloned().collect()
    }

    /// Built-in names replaced by a user template.
    pub fn overlaid(&self) -> Vec<&str> {
        self.origins
            .iter()
            .filter(|(_, origin)| **origin == TemplateOrigin::Overlay)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Render one source and normalise its line endings.
    pub fn render_source(&self, source: &SourceRef, ctx: &RenderContext) -> Result<String, TemplateError> {
        let tera_ctx = ctx.to_tera_context()?;
        self.render_with(source, &tera_ctx)
    }

    fn render_with(&self, source: &SourceRef, tera_ctx: &tera::Context) -> Result<String, TemplateError> {
        if !self.has_template(source) {
            return Err(TemplateError::UnknownSource(source.0.clone()));
        }
        let name = template_name(Path::new(&source.0));
        let rendered = self.tera.render(&name, tera_ctx)?;
        Ok(fsio::normalize_line_endings(&rendered))
    }

    /// Render every entry of `mapping`, keyed by target path.
    ///
    /// Excluded paths are not rendered.
    pub fn render_mapping(
        &self,
        mapping: &EffectiveMapping,
        ctx: &RenderContext,
    ) -> Result<BTreeMap<String, RenderedFile>, TemplateError> {
        let tera_ctx = ctx.to_tera_context()?;
        let mut out = BTreeMap::new();
        for entry in &mapping.entries {
            let content = self.render_with(&entry.source_ref, &tera_ctx)?;
            let hash = fsio::content_hash(&content);
            out.insert(
                entry.target_path.clone(),
                RenderedFile {
                    target_path: entry.target_path.clone(),
                    source_ref: entry.source_ref.clone(),
                    content,
                    hash,
                },
            );
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{ClassificationResult, PlatformType, RepoTarget};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn ctx(platform: PlatformType) -> RenderContext {
        let target = RepoTarget::from_path(std::path::PathBuf::from("/fleet/acme/testapp"), Some("acme".into()));
        RenderContext::new(
            &target,
            &ClassificationResult {
                platform_type: platform,
                confidence: 90,
                indicators: vec![],
                metadata: BTreeMap::new(),
            },
        )
    }

    #[test]
    fn engine_new_succeeds() {
        TemplateEngine::new(None).expect("embedded templates should parse");
    }

    #[test]
    fn all_embedded_templates_render_without_error() {
        let engine = TemplateEngine::new(None).unwrap();
        for (name, _) in TPLS {
            let out = engine
                .render_source(&SourceRef::from(*name), &ctx(PlatformType::Joomla))
                .unwrap_or_else(|e| panic!("render failed for {name}: {e}"));
            assert!(!out.is_empty(), "{name} rendered empty");
            assert!(!out.contains('\r'), "{name} contains CR");
        }
    }

    #[test]
    fn readme_mentions_repo_and_org() {
        let engine = TemplateEngine::new(None).unwrap();
        let out = engine
            .render_source(&SourceRef::from("shared/readme.md.tera"), &ctx(PlatformType::Dolibarr))
            .unwrap();
        assert!(out.starts_with("# testapp\n"));
        assert!(out.contains("Dolibarr module maintained by acme."));
    }

    #[test]
    fn unknown_source_is_an_error() {
        let engine = TemplateEngine::new(None).unwrap();
        let err = engine
            .render_source(&SourceRef::from("nope.tera"), &ctx(PlatformType::Generic))
            .unwrap_err();
        assert!(matches!(err, TemplateError::UnknownSource(_)));
    }

    #[test]
    fn user_template_overlays_builtin_and_adds_new_names() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("shared")).unwrap();
        std::fs::write(dir.path().join("shared/readme.md.tera"), "custom {{ repo_name }}\r\n").unwrap();
        std::fs::write(dir.path().join("extra.tera"), "extra").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let engine = TemplateEngine::new(Some(dir.path())).unwrap();
        let out = engine
            .render_source(&SourceRef::from("shared/readme.md.tera"), &ctx(PlatformType::Generic))
            .unwrap();
        assert_eq!(out, "custom testapp\n");
        assert!(engine.has_template(&SourceRef::from("extra.tera")));
        assert!(!engine.has_template(&SourceRef::from("notes.txt")));
        assert_eq!(engine.origin(&SourceRef::from("extra.tera")), Some(TemplateOrigin::User));
        assert_eq!(engine.origin(&SourceRef::from("generic/ci.yml.tera")), Some(TemplateOrigin::Builtin));
        assert_eq!(engine.overlaid(), ["shared/readme.md.tera"]);
    }

    #[test]
    fn names_are_case_and_separator_insensitive() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("Shared")).unwrap();
        std::fs::write(dir.path().join("Shared/README.md.tera"), "upper").unwrap();

        let engine = TemplateEngine::new(Some(dir.path())).unwrap();
        assert_eq!(engine.origin(&SourceRef::from("./shared/readme.md.tera")), Some(TemplateOrigin::Overlay));
        assert_eq!(engine.template_names().len(), TPLS.len());
    }

    #[test]
    fn missing_user_dir_is_ignored() {
        let dir = TempDir::new().unwrap();
        TemplateEngine::new(Some(&dir.path().join("absent"))).expect("absent overlay dir");
    }

    #[test]
    fn broken_user_template_fails_engine_construction() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.tera"), "{% if %}").unwrap();
        assert!(TemplateEngine::new(Some(dir.path())).is_err());
    }
}
