//! Platform detection for `fleet-detector`.
//!
//! [`detect`] scans a repository working copy, scores every candidate
//! platform from filesystem evidence, and returns one
//! [`ClassificationResult`]. [`Detector`] wraps the same call with an
//! optional [`DetectionCache`].
//!
//! Identical filesystem state always yields an identical result: the walk is
//! name-ordered, evidence is keyed by ordered maps, and nothing reads the clock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fleet_core::{ClassificationResult, DetectorConfig};
use thiserror::Error;

pub mod cache;
pub mod classifier;
pub mod collector;

pub use cache::{CacheEntry, CacheKey, DetectionCache, FileDetectionCache, MemoryDetectionCache};
pub use classifier::{classify, confidence};
pub use collector::{collect_signals, Evidence, RepoSnapshot};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from platform detection.
#[derive(Debug, Error)]
pub enum DetectError {
    /// Repository root missing, unreadable, or permission denied.
    #[error("cannot read repository at {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("repository path {path} is not a directory")]
    NotADirectory { path: PathBuf },

    /// Only surfaced by an explicit cache clear.
    #[error("detection cache I/O error at {path}: {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("detection cache lock poisoned")]
    CacheLock,
}

impl DetectError {
    pub(crate) fn unreadable(path: &Path, source: std::io::Error) -> Self {
        DetectError::Unreadable {
            path: path.to_path_buf(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Collect signals for the repository at `root` and classify it.
pub fn detect(root: &Path, config: &DetectorConfig) -> Result<ClassificationResult, DetectError> {
    let evidence = collect_signals(root, config)?;
    let result = classify(&evidence, config);
    tracing::debug!(
        repo = %root.display(),
        platform = %result.platform_type,
        confidence = result.confidence,
        "classified repository"
    );
    Ok(result)
}

/// Classifier with an optional injected cache.
#[derive(Clone)]
pub struct Detector {
    config: DetectorConfig,
    cache: Option<Arc<dyn DetectionCache>>,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config, cache: None }
    }

    pub fn with_cache(mut self, cache: Arc<dyn DetectionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Classify `root`, consulting the cache first when one is attached.
    pub fn classify(&self, root: &Path) -> Result<ClassificationResult, DetectError> {
        let Some(cache) = self.cache.as_ref() else {
            return detect(root, &self.config);
        };

        let key = CacheKey::for_repo(root, &self.config);
        if let Some(entry) = cache.get(&key) {
            tracing::debug!(repo = %root.display(), key = %key.key, "detection cache hit");
            return Ok(entry.classification);
        }

        let result = detect(root, &self.config)?;
        cache.set(&key, &result);
        Ok(result)
    }
}
