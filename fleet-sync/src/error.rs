//! Error types for fleet-sync.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Filesystem and serialization errors outside a repository's apply sequence.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("audit JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// One step of a repository's apply sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Audit,
    Prepare,
    Checkout,
    Write,
    Commit,
    OpenReview,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Audit => "audit",
            Step::Prepare => "prepare",
            Step::Checkout => "checkout",
            Step::Write => "write",
            Step::Commit => "commit",
            Step::OpenReview => "open_review",
        };
        f.write_str(s)
    }
}

/// Failure of a repository-hosting operation (git or review API).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("{0}")]
    Rejected(String),
}

/// Failure that aborts one repository's apply sequence. Sibling repositories
/// are unaffected.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{step} failed: {source}")]
    Transport {
        step: Step,
        #[source]
        source: TransportError,
    },

    #[error("writing {path} failed: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{step} timed out after {secs}s")]
    Timeout { step: Step, secs: u64 },

    #[error("{step} task aborted: {message}")]
    Join { step: Step, message: String },

    #[error("audit flush failed: {0}")]
    Audit(#[source] SyncError),

    #[error("no rendered content for {path}")]
    MissingContent { path: String },
}

impl ExecutionError {
    pub fn step(&self) -> Step {
        match self {
            ExecutionError::Transport { step, .. }
            | ExecutionError::Timeout { step, .. }
            | ExecutionError::Join { step, .. } => *step,
            ExecutionError::Write { .. } | ExecutionError::MissingContent { .. } => Step::Write,
            ExecutionError::Audit(_) => Step::Audit,
        }
    }

    /// Target path the failure is about, when there is one.
    pub fn path(&self) -> Option<&str> {
        match self {
            ExecutionError::Write { path, .. } | ExecutionError::MissingContent { path } => Some(path),
            _ => None,
        }
    }
}
