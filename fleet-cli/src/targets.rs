//! Target selection shared by every repository-facing command.
//!
//! `--repo` paths are taken as given; `--org <name>` expands to every
//! non-hidden directory under `<workspace_root>/<name>`. `--filter` then
//! keeps targets whose directory name matches the glob. Missing repository
//! paths are not rejected here: detection reports them per repository.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use clap::Args;
use glob::Pattern;

use fleet_core::error::config_io_err;
use fleet_core::{ConfigError, FleetConfig, RepoTarget};

#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Repository working copy to include (repeatable).
    #[arg(long = "repo", value_name = "PATH")]
    pub repos: Vec<PathBuf>,

    /// Include every repository of this organisation under `workspace_root`.
    #[arg(long, value_name = "NAME")]
    pub org: Option<String>,

    /// Keep only repositories whose directory name matches this glob.
    #[arg(long, value_name = "GLOB")]
    pub filter: Option<String>,

    /// Reuse cached platform classifications.
    #[arg(long)]
    pub use_cache: bool,

    /// Empty the detection cache before running.
    #[arg(long)]
    pub clear_cache: bool,
}

/// Resolve `args` to an ordered, de-duplicated target list.
pub fn discover(args: &TargetArgs, config: &FleetConfig, source: &Path) -> Result<Vec<RepoTarget>, ConfigError> {
    if args.repos.is_empty() && args.org.is_none() {
        return Err(ConfigError::invalid(
            source,
            "no repositories selected; pass --repo <path> or --org <name>",
        ));
    }

    let filter = args
        .filter
        .as_deref()
        .map(|glob| {
            Pattern::new(glob)
                .map_err(|e| ConfigError::invalid(source, format!("invalid --filter '{glob}': {e}")))
        })
        .transpose()?;

    let mut targets: Vec<RepoTarget> = args
        .repos
        .iter()
        .map(|path| RepoTarget::from_path(path.clone(), args.org.clone()))
        .collect();

    if let Some(org) = args.org.as_deref() {
        let workspace = config.workspace_root.as_deref().ok_or_else(|| {
            ConfigError::invalid(source, format!("--org {org} requires workspace_root to be set"))
        })?;
        targets.extend(org_repositories(&workspace.join(org), org)?);
    }

    let mut seen = BTreeSet::new();
    targets.retain(|t| seen.insert(t.path.clone()));
    if let Some(pattern) = &filter {
        targets.retain(|t| pattern.matches(&t.id.0));
    }
    tracing::debug!(count = targets.len(), "targets selected");
    Ok(targets)
}

/// Sorted child directories of `org_dir`, skipping hidden ones.
fn org_repositories(org_dir: &Path, org: &str) -> Result<Vec<RepoTarget>, ConfigError> {
    let entries = std::fs::read_dir(org_dir).map_err(|e| config_io_err(org_dir, e))?;
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('.'))
        })
        .collect();
    dirs.sort();
    Ok(dirs
        .into_iter()
        .map(|path| RepoTarget::from_path(path, Some(org.to_string())))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, FleetConfig) {
        let dir = TempDir::new().unwrap();
        for name in ["shop-api", "shop-web", "blog", ".archive"] {
            fs::create_dir_all(dir.path().join("acme").join(name)).unwrap();
        }
        fs::write(dir.path().join("acme/notes.txt"), "x").unwrap();
        let config = FleetConfig {
            workspace_root: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        (dir, config)
    }

    fn ids(targets: &[RepoTarget]) -> Vec<&str> {
        targets.iter().map(|t| t.id.0.as_str()).collect()
    }

    #[test]
    fn org_expands_to_sorted_visible_directories() {
        let (_dir, config) = workspace();
        let args = TargetArgs { org: Some("acme".into()), ..Default::default() };
        let targets = discover(&args, &config, Path::new("config.yaml")).unwrap();
        assert_eq!(ids(&targets), ["blog", "shop-api", "shop-web"]);
        assert!(targets.iter().all(|t| t.org.as_deref() == Some("acme")));
    }

    #[test]
    fn filter_matches_directory_name() {
        let (_dir, config) = workspace();
        let args = TargetArgs {
            org: Some("acme".into()),
            filter: Some("shop-*".into()),
            ..Default::default()
        };
        let targets = discover(&args, &config, Path::new("config.yaml")).unwrap();
        assert_eq!(ids(&targets), ["shop-api", "shop-web"]);
    }

    #[test]
    fn repeated_repo_is_deduplicated() {
        let args = TargetArgs {
            repos: vec![PathBuf::from("/srv/a"), PathBuf::from("/srv/a"), PathBuf::from("/srv/b")],
            ..Default::default()
        };
        let targets = discover(&args, &FleetConfig::default(), Path::new("config.yaml")).unwrap();
        assert_eq!(ids(&targets), ["a", "b"]);
    }

    #[test]
    fn org_without_workspace_root_is_config_error() {
        let args = TargetArgs { org: Some("acme".into()), ..Default::default() };
        let err = discover(&args, &FleetConfig::default(), Path::new("config.yaml")).unwrap_err();
        assert!(err.to_string().contains("workspace_root"));
    }

    #[test]
    fn nothing_selected_is_config_error() {
        let err = discover(&TargetArgs::default(), &FleetConfig::default(), Path::new("c.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn bad_glob_is_config_error() {
        let args = TargetArgs {
            repos: vec![PathBuf::from("/srv/a")],
            filter: Some("[".into()),
            ..Default::default()
        };
        assert!(discover(&args, &FleetConfig::default(), Path::new("c.yaml")).is_err());
    }
}
