//! Property-based tests using proptest.
//!
//! These tests check the path arithmetic, the extraction path guard and the
//! entry tree against randomly generated archive paths.

use std::collections::BTreeSet;
use std::path::Path;

use archivist::jobs::ListStats;
use archivist::paths::{
    entries_without_children, entry_paths_from_destination, is_same_or_descendant,
    join_archive_path,
};
use archivist::safety::{is_within, sanitize_archive_path};
use archivist::{Entry, EntryTree, PathSafety, validate_extract_path};
use proptest::prelude::*;

/// Strategy for a file path: 0-3 directory components and a `.txt` name.
///
/// Directory components never contain a dot, so a file can never share its
/// path with a directory.
fn file_path_strategy() -> impl Strategy<Value = String> {
    (
        proptest::collection::vec("[a-z][a-z0-9_-]{0,5}", 0..4),
        "[a-z][a-z0-9]{0,5}",
    )
        .prop_map(|(dirs, name)| {
            let mut path = dirs.join("/");
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(&name);
            path.push_str(".txt");
            path
        })
}

/// Strategy for a directory path with its trailing slash.
fn dir_path_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-z][a-z0-9_-]{0,5}", 1..4).prop_map(|parts| parts.join("/") + "/")
}

/// Strategy for hostile-looking member names.
fn raw_member_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec(
        prop_oneof![
            Just("..".to_string()),
            Just(".".to_string()),
            Just(String::new()),
            "[a-z]{1,6}",
        ],
        1..6,
    )
    .prop_flat_map(|parts| {
        (Just(parts), any::<bool>()).prop_map(|(parts, absolute)| {
            let joined = parts.join("/");
            if absolute { format!("/{joined}") } else { joined }
        })
    })
}

/// Every directory a full path implies, with trailing slashes.
fn implied_dirs(path: &str) -> Vec<String> {
    let segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    (1..segments.len())
        .map(|n| segments[..n].join("/") + "/")
        .collect()
}

// =============================================================================
// Extraction path guard
// =============================================================================

proptest! {
    /// Sanitized paths never climb out and are stable under re-sanitizing.
    #[test]
    fn sanitize_removes_traversal(raw in raw_member_strategy()) {
        let cleaned = sanitize_archive_path(&raw);
        prop_assert!(!cleaned.starts_with('/'));
        prop_assert!(!cleaned.split('/').any(|c| c == ".." || c == "."));
        prop_assert_eq!(sanitize_archive_path(&cleaned), cleaned.clone());
    }

    /// Whatever the policy, an accepted path stays below the destination.
    #[test]
    fn accepted_paths_stay_inside(raw in raw_member_strategy()) {
        let dest = Path::new("/extract/here");
        for policy in [PathSafety::Strict, PathSafety::Sanitize] {
            if let Ok(target) = validate_extract_path(&raw, dest, policy) {
                prop_assert!(is_within(dest, &target), "{} escaped with {:?}", raw, policy);
            }
        }
    }

    /// Strict mode accepts exactly the paths without traversal.
    #[test]
    fn strict_accepts_plain_paths(path in file_path_strategy()) {
        let dest = Path::new("/extract/here");
        let target = validate_extract_path(&path, dest, PathSafety::Strict).unwrap();
        prop_assert_eq!(target, dest.join(&path));

        let hostile = format!("../{path}");
        prop_assert!(validate_extract_path(&hostile, dest, PathSafety::Strict).is_err());
    }
}

// =============================================================================
// Path arithmetic
// =============================================================================

proptest! {
    /// A joined path lies below the directory it was joined to.
    #[test]
    fn joined_path_is_descendant(dir in dir_path_strategy(), name in "[a-z]{1,8}") {
        let joined = join_archive_path(&dir, &name);
        prop_assert!(is_same_or_descendant(&joined, &dir));
        prop_assert!(is_same_or_descendant(&joined, dir.trim_end_matches('/')));
        prop_assert!(joined.ends_with(&name));
    }

    /// Top-level selection keeps exactly the entries without a selected
    /// ancestor directory.
    #[test]
    fn without_children_keeps_top_level(
        files in proptest::collection::vec(file_path_strategy(), 0..12),
        dirs in proptest::collection::vec(dir_path_strategy(), 0..6),
    ) {
        let entries: Vec<Entry> = files
            .iter()
            .chain(dirs.iter())
            .map(|p| Entry::new(p.as_str()))
            .collect();
        let top = entries_without_children(&entries);

        let has_selected_ancestor = |path: &str| {
            dirs.iter().any(|d| path != d && path.starts_with(d.as_str()))
        };
        for entry in &entries {
            let kept = top.iter().any(|t| t.full_path() == entry.full_path());
            prop_assert_eq!(kept, !has_selected_ancestor(entry.full_path()), "{}", entry.full_path());
        }
    }

    /// Relocating several entries places every one of them below the
    /// destination and keeps the count.
    #[test]
    fn relocated_paths_land_in_destination(
        files in proptest::collection::btree_set(file_path_strategy(), 2..10),
        destination in dir_path_strategy(),
    ) {
        let paths: Vec<String> = files.into_iter().collect();
        let moved = entry_paths_from_destination(&paths, &destination, paths.len());
        prop_assert_eq!(moved.len(), paths.len());
        for path in &moved {
            prop_assert!(path.starts_with(&destination));
        }
    }

    /// A single relocated file is renamed verbatim.
    #[test]
    fn single_relocation_renames(file in file_path_strategy(), target in file_path_strategy()) {
        let moved = entry_paths_from_destination(&[file], &target, 1);
        prop_assert_eq!(moved, vec![target]);
    }
}

// =============================================================================
// Entry tree and listing statistics
// =============================================================================

proptest! {
    /// Inserting files synthesizes every parent exactly once.
    #[test]
    fn tree_contains_files_and_parents(
        files in proptest::collection::btree_set(file_path_strategy(), 1..20),
    ) {
        let mut tree = EntryTree::new();
        for file in &files {
            tree.insert(Entry::new(file.as_str()));
        }

        let mut expected: BTreeSet<String> = files.iter().cloned().collect();
        for file in &files {
            expected.extend(implied_dirs(file));
        }
        prop_assert_eq!(tree.len(), expected.len());
        for path in &expected {
            let id = tree.find_by_full_path(path);
            prop_assert!(id.is_some(), "{} missing", path);
            let entry = tree.get(id.unwrap()).unwrap();
            prop_assert_eq!(entry.is_dir(), path.ends_with('/'));
        }

        let listed: BTreeSet<String> = tree.iter().map(|(_, e)| e.full_path().to_string()).collect();
        prop_assert_eq!(listed, expected);
    }

    /// Reinserting a listed file updates it in place.
    #[test]
    fn tree_insert_is_idempotent(
        files in proptest::collection::btree_set(file_path_strategy(), 1..10),
        size in 1u64..1_000_000,
    ) {
        let mut tree = EntryTree::new();
        for file in &files {
            tree.insert(Entry::new(file.as_str()));
        }
        let len = tree.len();
        let first = files.iter().next().unwrap();
        let mut updated = Entry::new(first.as_str());
        updated.size = size;
        tree.insert(updated);

        prop_assert_eq!(tree.len(), len);
        let id = tree.find_by_full_path(first).unwrap();
        prop_assert_eq!(tree.get(id).unwrap().size, size);
    }

    /// Everything below one directory is a single-folder archive named after
    /// that directory.
    #[test]
    fn single_folder_detection(
        root in "[a-z]{1,8}",
        files in proptest::collection::btree_set(file_path_strategy(), 1..10),
    ) {
        let mut stats = ListStats::new();
        stats.add(&Entry::directory(root.as_str()));
        for file in &files {
            stats.add(&Entry::new(format!("{root}/{file}")));
        }
        prop_assert!(stats.is_single_folder_archive());
        prop_assert_eq!(stats.subfolder_name(), Some(root.as_str()));
        prop_assert_eq!(stats.number_of_files(), files.len());
        prop_assert_eq!(stats.number_of_dirs(), 1);

        stats.add(&Entry::new("stray.txt"));
        prop_assert!(!stats.is_single_folder_archive());
    }
}
