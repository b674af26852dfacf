//! Atomic write of one planned change into a repository working copy.
//!
//! ## `write_change` protocol
//!
//! 1. Refuse target paths that leave the repository root, including
//!    through a symlinked directory or file.
//! 2. Normalise line endings to LF.
//! 3. Write `<path>.fleet.tmp` next to the target, fsync it.
//! 4. Rename over the final path (atomic on POSIX).
//! 5. Return the SHA-256 of what was written.
//!
//! A crash can leave a stale `.fleet.tmp` but never a half-written target.

use std::path::Path;

use fleet_core::{fsio, ChangeItem};

use crate::error::ExecutionError;

/// Write `content` for `item` under `root` and return the after-hash.
pub fn write_change(root: &Path, item: &ChangeItem, content: &str) -> Result<String, ExecutionError> {
    let path = fsio::resolve_within(root, &item.target_path).map_err(|source| ExecutionError::Write {
        path: item.target_path.clone(),
        source,
    })?;
    let normalized = fsio::normalize_line_endings(content);
    fsio::write_atomic(&path, normalized.as_bytes()).map_err(|source| ExecutionError::Write {
        path: item.target_path.clone(),
        source,
    })?;
    tracing::info!(path = %path.display(), action = %item.action, "wrote");
    Ok(fsio::content_hash(&normalized))
}
