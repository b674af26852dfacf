//! Per-invocation state: where fleet keeps its files and what the
//! configuration says.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use fleet_core::config::{self, audit_dir, detection_cache_dir};
use fleet_core::{ConfigError, FleetConfig};
use fleet_detector::{DetectionCache, Detector, FileDetectionCache};
use fleet_sync::Pipeline;
use fleet_templates::Baseline;

use crate::targets::TargetArgs;

pub struct RunContext {
    /// `$FLEET_HOME` or `~/.fleet`.
    pub root: PathBuf,
    /// File the configuration came from; named in validation errors.
    pub source: PathBuf,
    pub config: FleetConfig,
}

impl RunContext {
    /// Load `explicit`, or `<root>/config.yaml` when absent. Any failure is a
    /// [`ConfigError`] in the returned chain.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let root = config::fleet_root().context("failed to locate the fleet directory")?;
        let (source, config) = match explicit {
            Some(path) => (path.to_path_buf(), config::load_file(path)?),
            None => (config::config_path_at(&root), config::load_at(&root)?),
        };
        tracing::debug!(root = %root.display(), config = %source.display(), "configuration loaded");
        Ok(Self { root, source, config })
    }

    pub fn state_dir(&self) -> PathBuf {
        self.config.state_dir(&self.root)
    }

    pub fn cache(&self) -> FileDetectionCache {
        FileDetectionCache::new(detection_cache_dir(&self.state_dir()))
    }

    pub fn audit_dir(&self) -> PathBuf {
        audit_dir(&self.state_dir())
    }

    /// Detector honouring `--clear-cache` and `--use-cache`.
    pub fn detector(&self, args: &TargetArgs) -> Result<Detector> {
        let cache = self.cache();
        if args.clear_cache {
            let removed = cache.clear().context("failed to clear the detection cache")?;
            tracing::info!(removed, "detection cache cleared");
        }
        let detector = Detector::new(self.config.detector.clone());
        if args.use_cache {
            let cache: Arc<dyn DetectionCache> = Arc::new(cache);
            return Ok(detector.with_cache(cache));
        }
        Ok(detector)
    }

    /// Built-in or user baseline plus a detector.
    pub fn pipeline(&self, args: &TargetArgs) -> Result<Pipeline> {
        let baseline = Baseline::load(&self.config).context("failed to load the template baseline")?;
        Ok(Pipeline::new(self.detector(args)?, baseline))
    }

    /// Apply a command-line `--parallel`, re-validating the result.
    pub fn override_parallel(&mut self, parallel: Option<usize>) -> Result<(), ConfigError> {
        if let Some(n) = parallel {
            self.config.parallel = n;
            self.config.validate(Path::new("--parallel"))?;
        }
        Ok(())
    }
}
