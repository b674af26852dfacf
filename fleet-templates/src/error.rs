//! Error types for fleet-templates.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building the template engine or rendering a source.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Tera template engine error.
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),

    /// JSON serialization error (building tera context).
    #[error("context serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error while loading user templates.
    #[error("template io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A mapping names a source the engine does not know.
    #[error("unknown template source '{0}'")]
    UnknownSource(String),
}

/// Override declarations that cannot be resolved for one repository.
///
/// Never fatal: the caller warns and falls back to the baseline mapping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error("override path '{path}' is not a relative path inside the repository")]
    InvalidPath { path: String },

    #[error("override for '{path}' redirects to unknown template source '{source_ref}'")]
    UnknownSource { path: String, source_ref: String },
}

/// Render `err` and its source chain on one line.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}
