//! Run configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.fleet/                 ($FLEET_HOME overrides the whole directory)
//!   config.yaml             (optional: every field has a default)
//!   cache/detection/*.json  (detection cache, one entry per repository)
//!   audit/<run_id>/*.jsonl  (audit ledger, one file per repository)
//! ```
//!
//! # API pattern
//!
//! Loaders come in two forms, as everywhere in fleet:
//! - `fn_at(root: &Path, …)`: explicit root; used in tests with `TempDir`
//! - `fn(…)`: derives the root from `$FLEET_HOME` / `dirs::home_dir()`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{config_io_err, ConfigError};

pub const FLEET_DIR: &str = ".fleet";
pub const CONFIG_FILE: &str = "config.yaml";
pub const FLEET_HOME_ENV: &str = "FLEET_HOME";

// ---------------------------------------------------------------------------
// Detector configuration
// ---------------------------------------------------------------------------

/// Per-indicator weights. Empirical defaults; every value can be tuned in
/// `config.yaml` under `detector.weights`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorWeights {
    pub joomla_manifest: u32,
    pub joomla_manifest_type: u32,
    pub joomla_version_tag: u32,
    pub joomla_directory: u32,
    pub dolibarr_descriptor: u32,
    pub dolibarr_descriptor_match: u32,
    /// Required-substring matches needed before content evidence counts.
    pub dolibarr_min_matches: usize,
    pub dolibarr_directory: u32,
    pub generic_floor: u32,
    pub generic_hygiene: u32,
}

impl Default for DetectorWeights {
    fn default() -> Self {
        Self {
            joomla_manifest: 50,
            joomla_manifest_type: 10,
            joomla_version_tag: 10,
            joomla_directory: 5,
            dolibarr_descriptor: 30,
            dolibarr_descriptor_match: 10,
            dolibarr_min_matches: 3,
            dolibarr_directory: 5,
            generic_floor: 50,
            generic_hygiene: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    /// Minimum confidence a specific platform needs to win.
    pub acceptance_threshold: u32,
    /// Maximum traversal depth below the repository root.
    pub max_depth: usize,
    /// Directory names never descended into.
    pub skip_dirs: Vec<String>,
    pub weights: DetectorWeights,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 50,
            max_depth: 4,
            skip_dirs: [".git", ".hg", ".svn", "node_modules", "vendor", "target", ".venv"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            weights: DetectorWeights::default(),
        }
    }
}

impl DetectorConfig {
    /// Stable digest of the detector settings; cached classifications made
    /// under different settings are not reused.
    pub fn digest(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        let mut h = Sha256::new();
        h.update(&json);
        hex::encode(h.finalize())
    }
}

// ---------------------------------------------------------------------------
// Fleet configuration
// ---------------------------------------------------------------------------

/// How the executor lands changes in a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApplyMode {
    /// Change branch → write → commit → open review request.
    #[default]
    Review,
    /// Write → commit on the current branch.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FleetConfig {
    /// Directory holding one sub-directory per organisation (`--org`).
    pub workspace_root: Option<PathBuf>,
    /// Cache and audit location. Defaults to the fleet root.
    pub state_dir: Option<PathBuf>,
    /// User catalogue replacing the built-in one.
    pub catalogue: Option<PathBuf>,
    /// `.tera` sources overlaying the built-in templates.
    pub templates_dir: Option<PathBuf>,
    pub parallel: usize,
    pub step_timeout_secs: u64,
    pub mode: ApplyMode,
    pub branch: String,
    pub detector: DetectorConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            workspace_root: None,
            state_dir: None,
            catalogue: None,
            templates_dir: None,
            parallel: 4,
            step_timeout_secs: 120,
            mode: ApplyMode::default(),
            branch: "fleet/baseline-sync".to_string(),
            detector: DetectorConfig::default(),
        }
    }
}

impl FleetConfig {
    /// Reject values that parse but cannot drive a run.
    pub fn validate(&self, source: &Path) -> Result<(), ConfigError> {
        if self.parallel == 0 {
            return Err(ConfigError::invalid(source, "parallel must be at least 1"));
        }
        if self.step_timeout_secs == 0 {
            return Err(ConfigError::invalid(source, "step_timeout_secs must be at least 1"));
        }
        if self.branch.trim().is_empty() {
            return Err(ConfigError::invalid(source, "branch must not be empty"));
        }
        if self.detector.weights.dolibarr_min_matches == 0 {
            return Err(ConfigError::invalid(
                source,
                "detector.weights.dolibarr_min_matches must be at least 1",
            ));
        }
        Ok(())
    }

    /// Directory for cache and audit state.
    pub fn state_dir(&self, root: &Path) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| root.to_path_buf())
    }
}

/// `<state>/cache/detection/`
pub fn detection_cache_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("cache").join("detection")
}

/// `<state>/audit/`
pub fn audit_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("audit")
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// `<home>/.fleet`: pure, no I/O.
pub fn fleet_root_at(home: &Path) -> PathBuf {
    home.join(FLEET_DIR)
}

/// `$FLEET_HOME`, else `<home>/.fleet`.
pub fn fleet_root() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = std::env::var_os(FLEET_HOME_ENV) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| fleet_root_at(&home))
        .ok_or(ConfigError::HomeNotFound)
}

/// `<root>/config.yaml`: pure, no I/O.
pub fn config_path_at(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Load `<root>/config.yaml`, falling back to defaults when absent.
pub fn load_at(root: &Path) -> Result<FleetConfig, ConfigError> {
    let path = config_path_at(root);
    if !path.exists() {
        return Ok(FleetConfig::default());
    }
    load_file(&path)
}

/// Load and validate an explicit configuration file.
pub fn load_file(path: &Path) -> Result<FleetConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| config_io_err(path, e))?;
    let config: FleetConfig = if contents.trim().is_empty() {
        FleetConfig::default()
    } else {
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };
    config.validate(path)?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<(PathBuf, FleetConfig), ConfigError> {
    let root = fleet_root()?;
    let config = load_at(&root)?;
    Ok((root, config))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
