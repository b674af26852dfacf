//! # fleet-templates
//!
//! Baseline template resolution for `fleet`: the per-platform catalogue, the
//! Tera engine that renders its sources, and the override fold that turns a
//! baseline into a repository's effective mapping.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fleet_core::{ClassificationResult, FleetConfig, RepoTarget};
//! use fleet_templates::{load_overrides, Baseline, RenderContext};
//!
//! fn desired_files(target: &RepoTarget, classification: &ClassificationResult) {
//!     let Ok(baseline) = Baseline::load(&FleetConfig::default()) else { return };
//!     let Ok(rules) = load_overrides(&target.path) else { return };
//!     let resolution = baseline.effective(classification.platform_type, &rules);
//!     let ctx = RenderContext::new(target, classification);
//!     if let Ok(files) = baseline.render(&resolution, &ctx) {
//!         for (path, file) in files {
//!             println!("{path}: {}", file.hash);
//!         }
//!     }
//! }
//! ```

pub mod baseline;
pub mod catalogue;
pub mod context;
pub mod engine;
pub mod error;
pub mod overrides;

pub use baseline::Baseline;
pub use catalogue::Catalogue;
pub use context::RenderContext;
pub use engine::{RenderedFile, TemplateEngine, TemplateOrigin};
pub use error::{PlanningError, TemplateError};
pub use overrides::{
    apply_overrides, baseline_mapping, load_overrides, overrides_path, parse_overrides,
    resolve_effective, OverrideWarning, Resolution,
};
