//! Baseline catalogue: which files every repository of a platform must carry.
//!
//! ```yaml
//! version: 1
//! platforms:
//!   joomla:
//!     - target: .github/workflows/ci.yml
//!       source: joomla/ci.yml.tera
//!       always_overwrite: true
//! ```
//!
//! The built-in catalogue is embedded; a user catalogue replaces it wholesale.
//! Any structural problem is a [`ConfigError`], raised before a repository is
//! touched.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use fleet_core::error::config_io_err;
use fleet_core::{fsio, ConfigError, PlatformType, SourceRef, TemplateMapping};

use crate::engine::TemplateEngine;

const BUILTIN_CATALOGUE: &str = include_str!("templates/catalogue.yaml");
const BUILTIN_ORIGIN: &str = "<built-in catalogue>";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCatalogue {
    version: u32,
    #[serde(default)]
    platforms: BTreeMap<String, Vec<RawEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntry {
    target: String,
    source: String,
    #[serde(default)]
    always_overwrite: bool,
}

/// Parsed and structurally validated catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalogue {
    pub version: u32,
    origin: PathBuf,
    platforms: BTreeMap<PlatformType, Vec<TemplateMapping>>,
}

impl Catalogue {
    /// The catalogue compiled into the binary.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_yaml(BUILTIN_CATALOGUE, Path::new(BUILTIN_ORIGIN))
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| config_io_err(path, e))?;
        Self::from_yaml(&contents, path)
    }

    /// Parse `yaml`; `origin` only labels errors.
    pub fn from_yaml(yaml: &str, origin: &Path) -> Result<Self, ConfigError> {
        let raw: RawCatalogue = serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;

        let mut platforms = BTreeMap::new();
        for (key, entries) in raw.platforms {
            let platform: PlatformType = key
                .parse()
                .map_err(|msg: String| ConfigError::invalid(origin, msg))?;

            let mut seen = BTreeSet::new();
            let mut mappings = Vec::with_capacity(entries.len());
            for entry in entries {
                if !fsio::is_contained_relative(&entry.target) {
                    return Err(ConfigError::invalid(
                        origin,
                        format!(
                            "{platform}: target '{}' must be a relative path inside the repository",
                            entry.target
                        ),
                    ));
                }
                let target_path = fsio::normalize_target(&entry.target);
                if !seen.insert(target_path.clone()) {
                    return Err(ConfigError::invalid(
                        origin,
                        format!("{platform}: duplicate target '{target_path}'"),
                    ));
                }
                if entry.source.trim().is_empty() {
                    return Err(ConfigError::invalid(
                        origin,
                        format!("{platform}: target '{target_path}' has an empty source"),
                    ));
                }
                mappings.push(TemplateMapping {
                    target_path,
                    source_ref: SourceRef::from(entry.source),
                    platform_type: platform,
                    always_overwrite: entry.always_overwrite,
                });
            }
            platforms.insert(platform, mappings);
        }

        Ok(Self {
            version: raw.version,
            origin: origin.to_path_buf(),
            platforms,
        })
    }

    /// Fail if any mapping names a source `engine` cannot render.
    pub fn validate_sources(&self, engine: &TemplateEngine) -> Result<(), ConfigError> {
        for mapping in self.platforms.values().flatten() {
            if !engine.has_template(&mapping.source_ref) {
                return Err(ConfigError::invalid(
                    &self.origin,
                    format!(
                        "{}: target '{}' references unknown template source '{}'",
                        mapping.platform_type, mapping.target_path, mapping.source_ref
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Static baseline for `platform`; empty when the catalogue has no entry.
    pub fn resolve(&self, platform: PlatformType) -> Vec<TemplateMapping> {
        self.platforms.get(&platform).cloned().unwrap_or_default()
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(yaml: &str) -> Result<Catalogue, ConfigError> {
        Catalogue::from_yaml(yaml, Path::new("catalogue.yaml"))
    }

    #[test]
    fn builtin_catalogue_covers_every_platform() {
        let catalogue = Catalogue::builtin().expect("built-in catalogue parses");
        for platform in PlatformType::priority_order() {
            assert!(!catalogue.resolve(*platform).is_empty(), "{platform} has no baseline");
        }
    }

    #[test]
    fn builtin_sources_are_all_embedded() {
        let engine = TemplateEngine::new(None).unwrap();
        Catalogue::builtin().unwrap().validate_sources(&engine).expect("sources known");
    }

    #[test]
    fn resolve_preserves_declaration_order_and_normalises_targets() {
        let catalogue = parse(
            "version: 1\nplatforms:\n  generic:\n    - {target: ./b.md, source: x.tera}\n    - {target: a//c.md, source: y.tera, always_overwrite: true}\n",
        )
        .unwrap();
        let mapping = catalogue.resolve(PlatformType::Generic);
        assert_eq!(mapping[0].target_path, "b.md");
        assert!(!mapping[0].always_overwrite);
        assert_eq!(mapping[1].target_path, "a/c.md");
        assert!(mapping[1].always_overwrite);
        assert!(catalogue.resolve(PlatformType::Joomla).is_empty());
    }

    #[rstest]
    #[case("version: 1\nplatforms:\n  wordpress: []\n", "unknown platform")]
    #[case(
        "version: 1\nplatforms:\n  generic:\n    - {target: a.md, source: x.tera}\n    - {target: ./a.md, source: y.tera}\n",
        "duplicate target"
    )]
    #[case("version: 1\nplatforms:\n  generic:\n    - {target: /etc/passwd, source: x.tera}\n", "relative path")]
    #[case("version: 1\nplatforms:\n  generic:\n    - {target: ../x.md, source: x.tera}\n", "relative path")]
    #[case("version: 1\nplatforms:\n  generic:\n    - {target: x.md, source: ''}\n", "empty source")]
    fn structural_problems_are_invalid(#[case] yaml: &str, #[case] needle: &str) {
        let err = parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }), "got: {err}");
        assert!(err.to_string().contains(needle), "'{err}' lacks '{needle}'");
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let err = parse("version: [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("catalogue.yaml"));
    }

    #[test]
    fn unknown_source_fails_validation() {
        let engine = TemplateEngine::new(None).unwrap();
        let catalogue =
            parse("version: 1\nplatforms:\n  generic:\n    - {target: x.md, source: missing.tera}\n").unwrap();
        let err = catalogue.validate_sources(&engine).unwrap_err();
        assert!(err.to_string().contains("missing.tera"));
    }
}
