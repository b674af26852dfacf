//! Detection cache: best-effort memoisation of classification results.
//!
//! The key is derived from the repository *path*, not its contents; callers
//! that just changed a repository must bypass the cache. Read and write
//! failures are logged and degrade to a miss, never to an error.
//!
//! On disk each entry is `<dir>/<key>.json`, replaced atomically, so entries
//! for different repositories never contend.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use fleet_core::{fsio, ClassificationResult, DetectorConfig};

use crate::DetectError;

/// Opaque cache key for one repository under one detector configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Short stable hash of the canonical repository path.
    pub key: String,
    /// Full hash of path + detector settings; a stored entry with a
    /// different fingerprint is a miss.
    pub fingerprint: String,
}

impl CacheKey {
    pub fn for_repo(root: &Path, config: &DetectorConfig) -> Self {
        let canonical = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let path = canonical.to_string_lossy();

        let mut h = Sha256::new();
        h.update(path.as_bytes());
        let path_hash = hex::encode(h.finalize());

        let mut h = Sha256::new();
        h.update(path.as_bytes());
        h.update(b"\n");
        h.update(config.digest().as_bytes());
        let fingerprint = hex::encode(h.finalize());

        Self {
            key: path_hash[..16].to_string(),
            fingerprint,
        }
    }
}

/// Stored cache payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub repo_fingerprint: String,
    pub classification: ClassificationResult,
    pub created_at: DateTime<Utc>,
}

/// Key-value store for classification results.
pub trait DetectionCache: Send + Sync {
    /// Entry for `key`, or `None` on miss, fingerprint mismatch, or any read failure.
    fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Store `classification` under `key`. Failures are logged only.
    fn set(&self, key: &CacheKey, classification: &ClassificationResult);

    /// Drop every entry; returns how many were removed.
    fn clear(&self) -> Result<usize, DetectError>;
}

// ---------------------------------------------------------------------------
// File-backed cache
// ---------------------------------------------------------------------------

/// One JSON file per key under `dir`.
#[derive(Debug, Clone)]
pub struct FileDetectionCache {
    dir: PathBuf,
}

impl FileDetectionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.key))
    }
}

impl DetectionCache for FileDetectionCache {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let path = self.entry_path(key);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "detection cache unreadable; treating as miss");
                return None;
            }
        };
        let entry: CacheEntry = match serde_json::from_str(&contents) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "corrupt detection cache entry; treating as miss");
                return None;
            }
        };
        if entry.repo_fingerprint != key.fingerprint {
            tracing::debug!(path = %path.display(), "detection cache fingerprint mismatch");
            return None;
        }
        Some(entry)
    }

    fn set(&self, key: &CacheKey, classification: &ClassificationResult) {
        let entry = CacheEntry {
            repo_fingerprint: key.fingerprint.clone(),
            classification: classification.clone(),
            created_at: Utc::now(),
        };
        let path = self.entry_path(key);
        let result = serde_json::to_vec_pretty(&entry)
            .map_err(std::io::Error::other)
            .and_then(|json| fsio::write_atomic(&path, &json));
        if let Err(err) = result {
            tracing::warn!(path = %path.display(), error = %err, "failed to write detection cache entry");
        }
    }

    fn clear(&self) -> Result<usize, DetectError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(DetectError::Cache { path: self.dir.clone(), source: err }),
        };
        let mut removed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            std::fs::remove_file(&path).map_err(|source| DetectError::Cache { path, source })?;
            removed += 1;
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// In-memory cache
// ---------------------------------------------------------------------------

/// Process-local cache.
#[derive(Debug, Default)]
pub struct MemoryDetectionCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryDetectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DetectionCache for MemoryDetectionCache {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => {
                tracing::warn!("detection cache lock poisoned; treating as miss");
                return None;
            }
        };
        entries
            .get(&key.key)
            .filter(|e| e.repo_fingerprint == key.fingerprint)
            .cloned()
    }

    fn set(&self, key: &CacheKey, classification: &ClassificationResult) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                key.key.clone(),
                CacheEntry {
                    repo_fingerprint: key.fingerprint.clone(),
                    classification: classification.clone(),
                    created_at: Utc::now(),
                },
            );
        }
    }

    fn clear(&self) -> Result<usize, DetectError> {
        let mut entries = self.entries.lock().map_err(|_| DetectError::CacheLock)?;
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::PlatformType;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn result() -> ClassificationResult {
        ClassificationResult {
            platform_type: PlatformType::Generic,
            confidence: 60,
            indicators: vec![],
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn key_is_stable_for_same_path() {
        let repo = TempDir::new().unwrap();
        let config = DetectorConfig::default();
        assert_eq!(CacheKey::for_repo(repo.path(), &config), CacheKey::for_repo(repo.path(), &config));
        assert_eq!(CacheKey::for_repo(repo.path(), &config).key.len(), 16);
    }

    #[test]
    fn file_cache_roundtrip_and_clear() {
        let dir = TempDir::new().unwrap();
        let repo = TempDir::new().unwrap();
        let cache = FileDetectionCache::new(dir.path().join("detection"));
        let key = CacheKey::for_repo(repo.path(), &DetectorConfig::default());

        assert!(cache.get(&key).is_none());
        cache.set(&key, &result());
        assert_eq!(cache.get(&key).unwrap().classification, result());
        assert_eq!(cache.clear().unwrap(), 1);
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let repo = TempDir::new().unwrap();
        let cache = FileDetectionCache::new(dir.path());
        let key = CacheKey::for_repo(repo.path(), &DetectorConfig::default());
        std::fs::write(cache.entry_path(&key), "{ not json").unwrap();
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn fingerprint_mismatch_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let repo = TempDir::new().unwrap();
        let cache = FileDetectionCache::new(dir.path());
        let key = CacheKey::for_repo(repo.path(), &DetectorConfig::default());
        cache.set(&key, &result());

        let mut tuned = DetectorConfig::default();
        tuned.acceptance_threshold = 70;
        let tuned_key = CacheKey::for_repo(repo.path(), &tuned);
        assert_eq!(tuned_key.key, key.key);
        assert!(cache.get(&tuned_key).is_none());
    }

    #[test]
    fn clear_on_missing_dir_is_zero() {
        let dir = TempDir::new().unwrap();
        let cache = FileDetectionCache::new(dir.path().join("never-created"));
        assert_eq!(cache.clear().unwrap(), 0);
    }

    #[test]
    fn memory_cache_roundtrip() {
        let repo = TempDir::new().unwrap();
        let cache = MemoryDetectionCache::new();
        let key = CacheKey::for_repo(repo.path(), &DetectorConfig::default());
        cache.set(&key, &result());
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key).is_some());
        assert_eq!(cache.clear().unwrap(), 1);
        assert!(cache.is_empty());
    }
}
