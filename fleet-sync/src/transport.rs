//! Repository transport: the side-effecting steps around the file writes.
//!
//! [`GitTransport`] drives the system `git` binary on the local working copy,
//! which picks up whatever credentials and hooks the operator has configured.
//! Opening the review request itself belongs to the hosting platform; the
//! transport reports the branch that is ready for it.

use std::path::Path;
use std::process::Command;

use serde::Serialize;

use fleet_core::RepoTarget;

use crate::error::TransportError;

/// Where a change set can be reviewed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewHandle {
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Blocking repository operations; the executor runs each one on the
/// blocking pool under a timeout.
pub trait RepoTransport: Send + Sync {
    /// Make sure the working copy is usable and isolated from local edits.
    fn prepare_workspace(&self, target: &RepoTarget) -> Result<(), TransportError>;

    /// Create or reset `branch` at the current HEAD and switch to it.
    fn checkout_branch(&self, target: &RepoTarget, branch: &str) -> Result<(), TransportError>;

    /// Commit `paths`; returns the new commit id, or `None` when nothing changed.
    fn commit(&self, target: &RepoTarget, paths: &[String], message: &str)
        -> Result<Option<String>, TransportError>;

    fn open_review(&self, target: &RepoTarget, branch: &str) -> Result<ReviewHandle, TransportError>;
}

// ---------------------------------------------------------------------------
// git CLI
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct GitTransport;

impl GitTransport {
    pub fn new() -> Self {
        Self
    }

    fn git(&self, root: &Path, args: &[&str]) -> Result<std::process::Output, TransportError> {
        let command = format!("git {}", args.join(" "));
        tracing::debug!(repo = %root.display(), %command, "running git");
        Command::new("git")
            .arg("-C")
            .arg(root)
            .args(args)
            .output()
            .map_err(|source| TransportError::Spawn { command, source })
    }

    fn git_ok(&self, root: &Path, args: &[&str]) -> Result<String, TransportError> {
        let output = self.git(root, args)?;
        if !output.status.success() {
            return Err(TransportError::Failed {
                command: format!("git {}", args.join(" ")),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl RepoTransport for GitTransport {
    fn prepare_workspace(&self, target: &RepoTarget) -> Result<(), TransportError> {
        self.git_ok(&target.path, &["rev-parse", "--is-inside-work-tree"])?;
        let dirty = self.git_ok(&target.path, &["status", "--porcelain", "--untracked-files=no"])?;
        if !dirty.is_empty() {
            return Err(TransportError::Rejected(format!(
                "{} has uncommitted changes to tracked files",
                target.path.display()
            )));
        }
        Ok(())
    }

    fn checkout_branch(&self, target: &RepoTarget, branch: &str) -> Result<(), TransportError> {
        self.git_ok(&target.path, &["checkout", "-B", branch])?;
        Ok(())
    }

    fn commit(
        &self,
        target: &RepoTarget,
        paths: &[String],
        message: &str,
    ) -> Result<Option<String>, TransportError> {
        if paths.is_empty() {
            return Ok(None);
        }
        let mut add = vec!["add", "--"];
        add.extend(paths.iter().map(String::as_str));
        self.git_ok(&target.path, &add)?;

        let staged = self.git(&target.path, &["diff", "--cached", "--quiet"])?;
        if staged.status.success() {
            return Ok(None);
        }
        self.git_ok(&target.path, &["commit", "--quiet", "-m", message])?;
        let head = self.git_ok(&target.path, &["rev-parse", "HEAD"])?;
        Ok(Some(head))
    }

    fn open_review(&self, target: &RepoTarget, branch: &str) -> Result<ReviewHandle, TransportError> {
        tracing::info!(
            repo = %target.id,
            %branch,
            "branch ready for review; push it and open the request on the hosting platform"
        );
        Ok(ReviewHandle { branch: branch.to_string(), url: None })
    }
}
