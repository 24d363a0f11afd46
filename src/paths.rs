//! Path arithmetic shared by backends and jobs.
//!
//! The functions here operate on archive full paths (slash separated, with a
//! trailing slash for directories). The central piece is
//! [`entry_paths_from_destination`], which computes where a set of entries
//! lands when it is copied or moved under a destination directory.

use std::path::Path;

use crate::entry::{Entry, path_segments};

/// Returns the full paths of `entries`, optionally without trailing slashes.
pub fn entry_full_paths(entries: &[Entry], without_trailing_slashes: bool) -> Vec<String> {
    entries
        .iter()
        .map(|e| {
            if without_trailing_slashes {
                e.full_path_without_trailing_slash().to_string()
            } else {
                e.full_path().to_string()
            }
        })
        .collect()
}

/// Returns the entries that have no ancestor directory in the same set.
///
/// The result is sorted by full path.
pub fn entries_without_children(entries: &[Entry]) -> Vec<Entry> {
    let mut sorted: Vec<&Entry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.full_path().cmp(b.full_path()));

    let mut last_folder = String::new();
    let mut result = Vec::new();
    for entry in sorted {
        if !last_folder.is_empty() && entry.full_path().starts_with(&last_folder) {
            continue;
        }
        last_folder = if entry.full_path().ends_with('/') {
            entry.full_path().to_string()
        } else {
            String::new()
        };
        result.push(entry.clone());
    }
    result
}

/// Computes the new full path of every entry when relocated under
/// `destination`.
///
/// `paths` are sorted first. A directory and everything listed under it move
/// as one unit. When `entries_without_children` is 1 the single top-level
/// entry is renamed to `destination` verbatim instead of being placed inside
/// it.
///
/// The result is ordered like the sorted input.
///
/// ```rust
/// use archivist::paths::entry_paths_from_destination;
///
/// let moved = entry_paths_from_destination(&["a.txt".to_string()], "empty_dir/a.txt", 1);
/// assert_eq!(moved, vec!["empty_dir/a.txt"]);
///
/// let paths = vec!["dir/".to_string(), "dir/a.txt".to_string(), "b.txt".to_string()];
/// let moved = entry_paths_from_destination(&paths, "new/", 2);
/// assert_eq!(moved, vec!["new/b.txt", "new/dir/", "new/dir/a.txt"]);
/// ```
pub fn entry_paths_from_destination(
    paths: &[String],
    destination: &str,
    entries_without_children: usize,
) -> Vec<String> {
    let mut sorted: Vec<&str> = paths.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut last_folder = String::new();
    let mut name_length = 0usize;
    let mut result = Vec::with_capacity(sorted.len());

    for path in sorted {
        let new_path = if !last_folder.is_empty() && path.starts_with(&last_folder) {
            let keep_from = if entries_without_children != 1 {
                last_folder.len() - name_length
            } else {
                last_folder.len()
            };
            format!("{destination}{}", &path[keep_from..])
        } else {
            let name = path_segments(path).last().unwrap_or("");
            let is_dir = path.ends_with('/');
            let new_path = if entries_without_children != 1 {
                let mut p = format!("{destination}{name}");
                if is_dir {
                    p.push('/');
                }
                p
            } else {
                destination.to_string()
            };
            if is_dir {
                name_length = name.len() + 1;
                last_folder = path.to_string();
            } else {
                name_length = 0;
                last_folder.clear();
            }
            new_path
        };
        result.push(new_path);
    }
    result
}

/// Returns the file name without its last extension, also dropping a
/// trailing `.tar` (`"archive.tar.gz"` → `"archive"`).
pub fn complete_base_name(file: &Path) -> String {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match name.rfind('.') {
        Some(0) | None => name.as_str(),
        Some(dot) => &name[..dot],
    };
    stem.strip_suffix(".tar").unwrap_or(stem).to_string()
}

/// Joins an archive directory path and a name.
pub fn join_archive_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Returns `true` if `path` equals `ancestor` or lies beneath it.
///
/// `ancestor` may be given with or without its trailing slash.
pub fn is_same_or_descendant(path: &str, ancestor: &str) -> bool {
    let base = ancestor.trim_end_matches('/');
    if base.is_empty() {
        return true;
    }
    let path = path.trim_end_matches('/');
    path == base || (path.starts_with(base) && path[base.len()..].starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(paths: &[&str]) -> Vec<Entry> {
        paths.iter().map(|p| Entry::new(*p)).collect()
    }

    fn strings(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_entry_full_paths() {
        let e = entries(&["a/", "a/b.txt"]);
        assert_eq!(entry_full_paths(&e, false), vec!["a/", "a/b.txt"]);
        assert_eq!(entry_full_paths(&e, true), vec!["a", "a/b.txt"]);
    }

    #[test]
    fn test_entries_without_children() {
        let e = entries(&["dir/sub/x.txt", "a.txt", "dir/", "dir/b.txt", "dirx.txt"]);
        let top: Vec<_> = entries_without_children(&e)
            .iter()
            .map(|e| e.full_path().to_string())
            .collect();
        assert_eq!(top, vec!["a.txt", "dir/", "dirx.txt"]);
    }

    #[test]
    fn test_single_file_renamed_verbatim() {
        let moved = entry_paths_from_destination(&strings(&["a.txt"]), "empty_dir/a.txt", 1);
        assert_eq!(moved, vec!["empty_dir/a.txt"]);
    }

    #[test]
    fn test_multiple_files_into_directory() {
        let moved =
            entry_paths_from_destination(&strings(&["b.txt", "a.txt"]), "empty_dir/", 2);
        assert_eq!(moved, vec!["empty_dir/a.txt", "empty_dir/b.txt"]);
    }

    #[test]
    fn test_single_directory_replaced() {
        let moved = entry_paths_from_destination(
            &strings(&["dir/", "dir/a.txt", "dir/sub/", "dir/sub/b.txt"]),
            "empty_dir/dir/",
            1,
        );
        assert_eq!(
            moved,
            vec![
                "empty_dir/dir/",
                "empty_dir/dir/a.txt",
                "empty_dir/dir/sub/",
                "empty_dir/dir/sub/b.txt"
            ]
        );
    }

    #[test]
    fn test_directory_and_file_into_directory() {
        let moved = entry_paths_from_destination(
            &strings(&["dir/", "dir/a.txt", "b.txt"]),
            "new/",
            2,
        );
        assert_eq!(moved, vec!["new/b.txt", "new/dir/", "new/dir/a.txt"]);
    }

    #[test]
    fn test_nested_folder_relocated_as_unit() {
        let moved = entry_paths_from_destination(
            &strings(&["x/deep/", "x/deep/f.txt", "y.txt"]),
            "",
            2,
        );
        assert_eq!(moved, vec!["deep/", "deep/f.txt", "y.txt"]);
    }

    #[test]
    fn test_complete_base_name() {
        assert_eq!(complete_base_name(Path::new("/tmp/archive.tar.gz")), "archive");
        assert_eq!(complete_base_name(Path::new("a.b.zip")), "a.b");
        assert_eq!(complete_base_name(Path::new("plain")), "plain");
        assert_eq!(complete_base_name(Path::new("x.tar")), "x");
    }

    #[test]
    fn test_is_same_or_descendant() {
        assert!(is_same_or_descendant("dir/a.txt", "dir/"));
        assert!(is_same_or_descendant("dir/", "dir"));
        assert!(!is_same_or_descendant("dirx/a.txt", "dir/"));
        assert!(is_same_or_descendant("anything", ""));
    }

    #[test]
    fn test_join_archive_path() {
        assert_eq!(join_archive_path("", "a"), "a");
        assert_eq!(join_archive_path("d/", "a"), "d/a");
        assert_eq!(join_archive_path("d", "a"), "d/a");
    }
}
