//! Extraction path validation.
//!
//! Archive members carry attacker-controlled paths. Before anything is
//! written below a destination directory, the member path is checked
//! against a [`PathSafety`] policy so that an entry such as
//! `../../etc/passwd` can never land outside the destination.

use std::path::{Component, Path, PathBuf};

use crate::{Error, Result};

/// Policy for validating extraction paths.
///
/// The default is `Strict`, which rejects any entry whose path contains a
/// parent-directory reference or is absolute.
///
/// # Examples
///
/// ```rust
/// use archivist::safety::PathSafety;
///
/// let policy = PathSafety::default();
/// assert_eq!(policy, PathSafety::Strict);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathSafety {
    /// Reject `..` components and absolute paths with [`Error::PathTraversal`].
    #[default]
    Strict,
    /// Rewrite the path instead of rejecting it: `..`, `.` and root
    /// components are dropped, so `anotherDir/../../file.txt` becomes
    /// `anotherDir/file.txt`.
    Sanitize,
    /// No validation (DANGEROUS - only for archives you created yourself).
    Disabled,
}

/// Removes parent, current-directory and root components from an archive path.
///
/// ```rust
/// use archivist::safety::sanitize_archive_path;
///
/// assert_eq!(sanitize_archive_path("anotherDir/../../file.txt"), "anotherDir/file.txt");
/// assert_eq!(sanitize_archive_path("/etc/passwd"), "etc/passwd");
/// ```
pub fn sanitize_archive_path(path: &str) -> String {
    let trailing = path.ends_with('/');
    let mut cleaned = path
        .split(['/', '\\'])
        .filter(|c| !c.is_empty() && *c != "." && *c != "..")
        .collect::<Vec<_>>()
        .join("/");
    if trailing && !cleaned.is_empty() {
        cleaned.push('/');
    }
    cleaned
}

fn escapes(path: &str) -> bool {
    if path.starts_with('/') || path.starts_with('\\') {
        return true;
    }
    // Windows drive prefixes (C:\, D:/)
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return true;
    }
    path.split(['/', '\\']).any(|c| c == "..")
}

/// Validates an extraction path against the given safety policy.
///
/// # Returns
///
/// The on-disk location below `dest` the member should be written to.
pub fn validate_extract_path(archive_path: &str, dest: &Path, policy: PathSafety) -> Result<PathBuf> {
    match policy {
        PathSafety::Disabled => Ok(dest.join(archive_path)),
        PathSafety::Strict => {
            if escapes(archive_path) {
                return Err(Error::PathTraversal {
                    path: archive_path.to_string(),
                });
            }
            Ok(dest.join(archive_path.trim_end_matches('/')))
        }
        PathSafety::Sanitize => {
            let cleaned = sanitize_archive_path(archive_path);
            if cleaned.is_empty() {
                return Err(Error::PathTraversal {
                    path: archive_path.to_string(),
                });
            }
            Ok(dest.join(cleaned.trim_end_matches('/')))
        }
    }
}

/// Returns the sanitized location of `archive_path` below `dest`.
///
/// Used when previewing a single member: the path is rewritten rather than
/// rejected.
pub fn validated_file_path(dest: &Path, archive_path: &str) -> Result<PathBuf> {
    validate_extract_path(archive_path, dest, PathSafety::Sanitize)
}

/// Checks that `candidate` is lexically contained in `root`.
pub fn is_within(root: &Path, candidate: &Path) -> bool {
    let mut depth: i64 = 0;
    let Ok(relative) = candidate.strip_prefix(root) else {
        return false;
    };
    for component in relative.components() {
        match component {
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

/// Validates that a symlink target doesn't escape the extraction directory.
///
/// The depth of the link inside the archive is used as the starting point,
/// so `a/b/link -> ../x` is fine while `link -> ../x` is not.
pub fn validate_symlink_target(entry_path: &str, target: &str) -> Result<()> {
    let reject = || Error::PathTraversal {
        path: format!("{entry_path} -> {target}"),
    };
    if target.starts_with('/') || target.starts_with('\\') {
        return Err(reject());
    }
    if target.len() >= 2 && target.as_bytes()[1] == b':' {
        return Err(reject());
    }

    let entry_parent = Path::new(entry_path.trim_end_matches('/'))
        .parent()
        .unwrap_or(Path::new(""));
    let mut depth = entry_parent
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count() as i64;

    for component in Path::new(target).components() {
        match component {
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return Err(reject());
                }
            }
            Component::Normal(_) => depth += 1,
            _ => {}
        }
    }
    Ok(())
}

/// Creates a symbolic link at the specified path pointing to the target.
#[cfg(unix)]
pub(crate) fn create_symlink(link_path: &Path, target: &str) -> Result<()> {
    std::os::unix::fs::symlink(target, link_path).map_err(Error::Io)
}

/// Creates a symbolic link at the specified path pointing to the target.
#[cfg(windows)]
pub(crate) fn create_symlink(link_path: &Path, target: &str) -> Result<()> {
    let is_dir = link_path
        .parent()
        .map(|p| p.join(target).is_dir())
        .unwrap_or(false);
    if is_dir {
        std::os::windows::fs::symlink_dir(target, link_path).map_err(Error::Io)
    } else {
        std::os::windows::fs::symlink_file(target, link_path).map_err(Error::Io)
    }
}

/// Creates a symbolic link at the specified path pointing to the target.
#[cfg(not(any(unix, windows)))]
pub(crate) fn create_symlink(_link_path: &Path, _target: &str) -> Result<()> {
    Err(Error::Unsupported {
        operation: "symbolic links",
        backend: "this platform".into(),
    })
}
