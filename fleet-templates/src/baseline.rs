//! [`Baseline`]: the catalogue and the engine that renders it, loaded once
//! per run.

use std::collections::BTreeMap;
use std::path::Path;

use fleet_core::{ConfigError, FleetConfig, OverrideRule, PlatformType, TemplateMapping};

use crate::catalogue::Catalogue;
use crate::context::RenderContext;
use crate::engine::{RenderedFile, TemplateEngine};
use crate::error::{error_chain, TemplateError};
use crate::overrides::{apply_overrides, resolve_effective, Resolution};
use crate::PlanningError;

pub struct Baseline {
    catalogue: Catalogue,
    engine: TemplateEngine,
}

impl Baseline {
    /// Build from configuration: built-in or user catalogue, plus the
    /// optional template overlay directory. Every catalogue source must resolve.
    pub fn load(config: &FleetConfig) -> Result<Self, ConfigError> {
        let engine = Self::build_engine(config.templates_dir.as_deref())?;
        let catalogue = match &config.catalogue {
            Some(path) => Catalogue::load_file(path)?,
            None => Catalogue::builtin()?,
        };
        Self::new(catalogue, engine)
    }

    pub fn new(catalogue: Catalogue, engine: TemplateEngine) -> Result<Self, ConfigError> {
        catalogue.validate_sources(&engine)?;
        let overlaid = engine.overlaid();
        if !overlaid.is_empty() {
            tracing::info!(templates = ?overlaid, "user templates replace built-ins");
        }
        tracing::debug!(
            catalogue = %catalogue.origin().display(),
            templates = engine.template_names().len(),
            "baseline loaded"
        );
        Ok(Self { catalogue, engine })
    }

    fn build_engine(dir: Option<&Path>) -> Result<TemplateEngine, ConfigError> {
        TemplateEngine::new(dir).map_err(|e| {
            let path = dir.unwrap_or(Path::new("<built-in templates>"));
            ConfigError::invalid(path, error_chain(&e))
        })
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    pub fn templates(&self) -> &TemplateEngine {
        &self.engine
    }

    pub fn resolve(&self, platform: PlatformType) -> Vec<TemplateMapping> {
        self.catalogue.resolve(platform)
    }

    /// Strict fold of `rules` over the baseline for `platform`.
    pub fn apply_overrides(
        &self,
        platform: PlatformType,
        rules: &[OverrideRule],
    ) -> Result<Resolution, PlanningError> {
        apply_overrides(&self.resolve(platform), rules, |s| self.engine.has_template(s))
    }

    /// Effective mapping for `platform`; unresolvable overrides degrade to the
    /// baseline with a warning.
    pub fn effective(&self, platform: PlatformType, rules: &[OverrideRule]) -> Resolution {
        resolve_effective(&self.resolve(platform), rules, |s| self.engine.has_template(s))
    }

    pub fn render(
        &self,
        resolution: &Resolution,
        ctx: &RenderContext,
    ) -> Result<BTreeMap<String, RenderedFile>, TemplateError> {
        self.engine.render_mapping(&resolution.mapping, ctx)
    }
}
