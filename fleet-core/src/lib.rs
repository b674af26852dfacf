//! fleet core library: domain types, run configuration, errors, and the
//! hashing / atomic-replace primitives every other crate builds on.
//!
//! - [`types`]: newtypes and the reconciliation data model
//! - [`error`]: [`ConfigError`]
//! - [`config`]: `config.yaml` loading and detector tuning
//! - [`fsio`]: content hashing and atomic file replacement

pub mod config;
pub mod error;
pub mod fsio;
pub mod types;

pub use config::{ApplyMode, DetectorConfig, DetectorWeights, FleetConfig};
pub use error::ConfigError;
pub use types::{
    AuditPhase, AuditRecord, AuditResult, ChangeAction, ChangeItem, ClassificationResult,
    DecisionSource, EffectiveEntry, EffectiveMapping, Indicator, OverrideAction, OverrideRule,
    PlatformType, RepoId, RepoTarget, RunId, SourceRef, TemplateMapping,
};
