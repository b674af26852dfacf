//! Content hashing and atomic file replacement.
//!
//! ## `write_atomic` protocol
//!
//! 1. Create the parent directory if missing.
//! 2. Write the full payload to `<path>.fleet.tmp` in the same directory.
//! 3. `fsync` the temporary file.
//! 4. Rename over the final path (atomic on POSIX).
//!
//! A failed rename removes the temporary file and leaves the original intact.

use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

/// Normalise line endings to LF so CRLF checkouts hash like LF ones.
pub fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n")
}

/// SHA-256 hex digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// Hash text content after line-ending normalisation.
pub fn content_hash(content: &str) -> String {
    sha256_hex(normalize_line_endings(content).as_bytes())
}

/// Hash the file at `path`, or `Ok(None)` when it does not exist.
///
/// UTF-8 files are hashed like [`content_hash`]; other files are hashed raw.
pub fn hash_file(path: &Path) -> std::io::Result<Option<String>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(match String::from_utf8(bytes) {
            Ok(text) => content_hash(&text),
            Err(e) => sha256_hex(e.as_bytes()),
        })),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Temporary sibling used by [`write_atomic`].
pub fn tmp_path_for(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.fleet.tmp", path.display()))
}

/// Atomically replace `path` with `bytes`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    write_atomic_with_tmp(path, bytes, &tmp_path_for(path))
}

pub(crate) fn write_atomic_with_tmp(path: &Path, bytes: &[u8], tmp: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    {
        let mut file = std::fs::File::create(tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(e);
    }
    Ok(())
}

/// `true` if `target` is a non-empty relative path that stays inside the
/// directory it is joined to (no root, prefix or `..` components).
pub fn is_contained_relative(target: &str) -> bool {
    if target.trim().is_empty() {
        return false;
    }
    Path::new(target)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Join `target` onto `root`, refusing paths that leave `root` either by
/// their text or through a symlink anywhere along the way.
///
/// Components that do not exist yet are accepted: they will be created as
/// plain directories under the last resolved ancestor. A dangling symlink
/// is refused since its destination cannot be checked. Refusals use
/// [`ErrorKind::InvalidInput`].
pub fn resolve_within(root: &Path, target: &str) -> std::io::Result<PathBuf> {
    if !is_contained_relative(target) {
        return Err(escapes(target));
    }
    let canonical_root = root.canonicalize()?;
    let mut current = canonical_root.clone();
    for component in Path::new(target).components() {
        let Component::Normal(name) = component else { continue };
        current.push(name);
        match std::fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let resolved = match current.canonicalize() {
                    Ok(resolved) => resolved,
                    Err(err) if err.kind() == ErrorKind::NotFound => return Err(escapes(target)),
                    Err(err) => return Err(err),
                };
                if !resolved.starts_with(&canonical_root) {
                    return Err(escapes(target));
                }
                current = resolved;
            }
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) => return Err(err),
        }
    }
    Ok(root.join(target))
}

fn escapes(target: &str) -> std::io::Error {
    std::io::Error::new(
        ErrorKind::InvalidInput,
        format!("{target} resolves outside the repository"),
    )
}

/// Canonical forward-slash form of a repository-relative path
/// (`./a//b` → `a/b`).
pub fn normalize_target(target: &str) -> String {
    Path::new(target)
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn crlf_and_lf_hash_identically() {
        assert_eq!(content_hash("a\r\nb\r\n"), content_hash("a\nb\n"));
    }

    #[test]
    fn hash_missing_file_is_none() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(hash_file(&tmp.path().join("nope")).unwrap(), None);
    }

    #[test]
    fn hash_file_matches_content_hash() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("README.md");
        std::fs::write(&path, "hello\r\n").unwrap();
        assert_eq!(hash_file(&path).unwrap(), Some(content_hash("hello\n")));
    }

    #[test]
    fn resolve_within_accepts_missing_tail() {
        let tmp = TempDir::new().unwrap();
        let path = resolve_within(tmp.path(), ".github/workflows/ci.yml").unwrap();
        assert_eq!(path, tmp.path().join(".github/workflows/ci.yml"));
        assert!(resolve_within(tmp.path(), "../x.md").is_err());
    }

    #[test]
    #[cfg(unix)]
    fn resolve_within_refuses_symlinked_directory_outside_root() {
        let repo = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), repo.path().join(".github")).unwrap();

        let err = resolve_within(repo.path(), ".github/workflows/ci.yml").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    #[cfg(unix)]
    fn resolve_within_allows_symlink_inside_root() {
        let repo = TempDir::new().unwrap();
        std::fs::create_dir_all(repo.path().join("ci")).unwrap();
        std::os::unix::fs::symlink(repo.path().join("ci"), repo.path().join(".github")).unwrap();
        assert!(resolve_within(repo.path(), ".github/ci.yml").is_ok());
    }

    #[test]
    #[cfg(unix)]
    fn resolve_within_refuses_dangling_and_outside_file_links() {
        let repo = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("SECURITY.md"), "theirs").unwrap();
        std::os::unix::fs::symlink(outside.path().join("SECURITY.md"), repo.path().join("SECURITY.md")).unwrap();
        std::os::unix::fs::symlink(repo.path().join("nowhere"), repo.path().join("LICENSE")).unwrap();

        assert!(resolve_within(repo.path(), "SECURITY.md").is_err());
        assert!(resolve_within(repo.path(), "LICENSE").is_err());
    }

    #[test]
    fn write_atomic_creates_parents_and_cleans_tmp() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".github").join("workflows").join("ci.yml");
        write_atomic(&path, b"on: push\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "on: push\n");
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    #[cfg(unix)]
    fn rename_failure_leaves_original_and_cleans_tmp() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        let readonly_dir = root.path().join("readonly");
        std::fs::create_dir_all(&readonly_dir).unwrap();
        let path = readonly_dir.join("file.md");
        std::fs::write(&path, "original").unwrap();

        let mut perms = std::fs::metadata(&readonly_dir).unwrap().permissions();
        perms.set_mode(0o555);
        std::fs::set_permissions(&readonly_dir, perms).unwrap();

        let tmp_dir = TempDir::new().unwrap();
        let tmp_path = tmp_dir.path().join("file.md.fleet.tmp");
        let result = write_atomic_with_tmp(&path, b"new content", &tmp_path);

        let mut perms = std::fs::metadata(&readonly_dir).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&readonly_dir, perms).unwrap();

        // Running as root bypasses directory permissions.
        if result.is_err() {
            assert_eq!(std::fs::read_to_string(&path).unwrap(), "original");
            assert!(!tmp_path.exists());
        }
    }

    #[test]
    fn contained_relative_paths() {
        assert!(is_contained_relative(".github/workflows/ci.yml"));
        assert!(is_contained_relative("./README.md"));
        assert!(!is_contained_relative("/etc/passwd"));
        assert!(!is_contained_relative("../sibling/README.md"));
        assert!(!is_contained_relative("docs/../../x"));
        assert!(!is_contained_relative(""));
    }

    #[test]
    fn normalize_target_strips_curdir_and_duplicate_separators() {
        assert_eq!(normalize_target("./docs//guide.md"), "docs/guide.md");
    }
}
