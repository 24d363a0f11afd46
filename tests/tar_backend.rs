//! Native tar backend tests.
//!
//! Archives are created with [`AddToArchive`] and then driven through the
//! [`Session`] and the [`Archive`] facade, the way an application would.

use std::fs;
use std::path::{Path, PathBuf};

use archivist::{
    AddToArchive, Archive, CompressionOptions, Entry, Error, ExtractionOptions, ListSummary,
    PathSafety, Session, SessionConfig,
};
use tempfile::TempDir;

mod common;

use common::{write_raw_tar, write_tree};

fn session(dir: &TempDir) -> Session {
    Session::with_config(SessionConfig::new().temp_root(dir.path().join("scratch"))).unwrap()
}

/// Creates `<dir>/<name>` from a small project tree.
async fn project_archive(dir: &TempDir, session: &Session, name: &str) -> PathBuf {
    let src = dir.path().join("src");
    write_tree(
        &src,
        &[
            ("project/Cargo.toml", "[package]"),
            ("project/src/main.rs", "fn main() {}"),
            ("project/src/lib.rs", "pub fn lib() {}"),
        ],
    );
    AddToArchive::new()
        .add_input(src.join("project"))
        .filename(dir.path().join(name))
        .change_to_first_path(true)
        .run(session)
        .await
        .unwrap()
}

async fn list(archive: &Archive) -> ListSummary {
    archive.list().unwrap().start().wait().await.unwrap()
}

fn has(summary: &ListSummary, path: &str) -> bool {
    summary.tree.find_by_full_path(path).is_some()
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

// =============================================================================
// Creating and listing
// =============================================================================

#[tokio::test]
async fn test_create_and_list() {
    let dir = TempDir::new().unwrap();
    let session = session(&dir);
    let path = project_archive(&dir, &session, "project.tar").await;

    let archive = session.open(&path);
    assert_eq!(archive.plugin().map(|p| p.id.as_str()), Some("tar"));
    let summary = list(&archive).await;

    assert!(summary.is_single_folder_archive);
    assert_eq!(summary.subfolder_name, "project");
    assert_eq!(summary.number_of_files, 3);
    assert!(has(&summary, "project/src/main.rs"));
    assert!(!summary.is_corrupt);

    let main = summary
        .tree
        .find_by_full_path("project/src/main.rs")
        .and_then(|id| summary.tree.get(id))
        .unwrap();
    assert_eq!(main.size, 12);
    assert!(main.timestamp.is_some());
    assert!(main.property("permissions").is_some());
}

#[cfg(feature = "gzip")]
#[tokio::test]
async fn test_compressed_tar() {
    let dir = TempDir::new().unwrap();
    let session = session(&dir);
    let path = project_archive(&dir, &session, "project.tar.gz").await;

    let magic = fs::read(&path).unwrap();
    assert_eq!(&magic[..2], &[0x1f, 0x8b]);

    let archive = session.open(&path);
    assert_eq!(archive.number_of_files().await.unwrap(), 3);
}

#[tokio::test]
async fn test_auto_filename_avoids_collisions() {
    let dir = TempDir::new().unwrap();
    let session = session(&dir);
    write_tree(dir.path(), &[("notes.txt", "one")]);
    fs::write(dir.path().join("notes.tar"), b"").unwrap();

    let created = AddToArchive::new()
        .add_input(dir.path().join("notes.txt"))
        .auto_filename_suffix("tar")
        .run(&session)
        .await
        .unwrap();
    assert_eq!(created, dir.path().join("notes_1.tar"));
    assert_eq!(session.open(&created).number_of_files().await.unwrap(), 1);
}

// =============================================================================
// Extraction
// =============================================================================

#[tokio::test]
async fn test_extract_all_preserving_paths() {
    let dir = TempDir::new().unwrap();
    let session = session(&dir);
    let path = project_archive(&dir, &session, "project.tar").await;
    let dest = dir.path().join("out");

    let archive = session.open(&path);
    archive
        .copy_files(Vec::new(), &dest, ExtractionOptions::new().preserve_paths(true))
        .await
        .unwrap()
        .start()
        .wait()
        .await
        .unwrap();

    assert_eq!(read(&dest.join("project/src/lib.rs")), "pub fn lib() {}");
    assert_eq!(read(&dest.join("project/Cargo.toml")), "[package]");
}

#[tokio::test]
async fn test_extract_directory_with_root_node() {
    let dir = TempDir::new().unwrap();
    let session = session(&dir);
    let path = project_archive(&dir, &session, "project.tar").await;
    let dest = dir.path().join("out");

    let mut src = Entry::directory("project/src");
    src.root_node = Some("project".into());
    let archive = session.open(&path);
    archive
        .copy_files(vec![src], &dest, ExtractionOptions::new().preserve_paths(true))
        .await
        .unwrap()
        .start()
        .wait()
        .await
        .unwrap();

    assert!(dest.join("src/main.rs").is_file());
    assert!(!dest.join("project").exists());
    assert!(!dest.join("Cargo.toml").exists());
}

#[tokio::test]
async fn test_extract_flat() {
    let dir = TempDir::new().unwrap();
    let session = session(&dir);
    let path = project_archive(&dir, &session, "project.tar").await;
    let dest = dir.path().join("out");

    let archive = session.open(&path);
    archive
        .copy_files(vec![Entry::new("project/src/main.rs")], &dest, ExtractionOptions::new())
        .await
        .unwrap()
        .start()
        .wait()
        .await
        .unwrap();
    assert_eq!(read(&dest.join("main.rs")), "fn main() {}");
    assert!(!dest.join("project").exists());
}

#[tokio::test]
async fn test_extract_missing_member() {
    let dir = TempDir::new().unwrap();
    let session = session(&dir);
    let path = project_archive(&dir, &session, "project.tar").await;

    let archive = session.open(&path);
    let err = archive
        .copy_files(vec![Entry::new("project/nope.rs")], dir.path().join("out"), ExtractionOptions::new())
        .await
        .unwrap()
        .start()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EntryNotFound { .. }));
}

// =============================================================================
// Hostile archives
// =============================================================================

#[tokio::test]
async fn test_traversal_member_is_rejected() {
    let dir = TempDir::new().unwrap();
    let session = session(&dir);
    let path = dir.path().join("evil.tar");
    write_raw_tar(&path, &[("../escaped.txt", b"evil"), ("ok.txt", b"fine")]);
    let dest = dir.path().join("out");

    let archive = session.open(&path);
    let summary = list(&archive).await;
    assert_eq!(summary.number_of_files, 2);

    let err = archive
        .copy_files(Vec::new(), &dest, ExtractionOptions::new().preserve_paths(true))
        .await
        .unwrap()
        .start()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PathTraversal { .. }));
    assert!(!dir.path().join("escaped.txt").exists());
}

#[tokio::test]
async fn test_traversal_member_is_sanitized() {
    let dir = TempDir::new().unwrap();
    let session = session(&dir);
    let path = dir.path().join("evil.tar");
    write_raw_tar(&path, &[("../escaped.txt", b"evil")]);
    let dest = dir.path().join("out");

    session
        .open(&path)
        .copy_files(
            Vec::new(),
            &dest,
            ExtractionOptions::new()
                .preserve_paths(true)
                .path_safety(PathSafety::Sanitize),
        )
        .await
        .unwrap()
        .start()
        .wait()
        .await
        .unwrap();
    assert_eq!(read(&dest.join("escaped.txt")), "evil");
    assert!(!dir.path().join("escaped.txt").exists());
}

#[tokio::test]
async fn test_truncated_archive_is_read_only() {
    let dir = TempDir::new().unwrap();
    let session = session(&dir);
    let path = dir.path().join("cut.tar");
    write_raw_tar(&path, &[("a.txt", b"a"), ("b.txt", b"b")]);
    let bytes = fs::read(&path).unwrap();
    // First header and data block, then part of the second header.
    fs::write(&path, &bytes[..1024 + 100]).unwrap();

    let archive = session.open(&path);
    let (events, result) = archive.list().unwrap().start().wait_with_events().await;
    let summary = result.unwrap();
    assert!(summary.is_corrupt);
    assert_eq!(summary.number_of_files, 1);
    assert!(events.iter().any(|e| matches!(e, archivist::JobEvent::Error { .. })));
    assert!(archive.is_read_only().await);
}

// =============================================================================
// Editing
// =============================================================================

#[tokio::test]
async fn test_add_into_subfolder() {
    let dir = TempDir::new().unwrap();
    let session = session(&dir);
    let path = project_archive(&dir, &session, "project.tar").await;
    write_tree(dir.path(), &[("README.md", "# project")]);

    let archive = session.open(&path);
    let readme = dir.path().join("README.md");
    archive
        .add_files(
            vec![Entry::new(readme.to_string_lossy())],
            Some(Entry::directory("project/docs")),
            CompressionOptions::new(),
        )
        .unwrap()
        .start()
        .wait()
        .await
        .unwrap();

    let summary = list(&archive).await;
    assert!(has(&summary, "project/docs/README.md"));
    assert_eq!(summary.number_of_files, 4);
    assert!(summary.is_single_folder_archive);
}

#[tokio::test]
async fn test_add_replaces_existing_member() {
    let dir = TempDir::new().unwrap();
    let session = session(&dir);
    let path = project_archive(&dir, &session, "project.tar").await;
    write_tree(dir.path(), &[("new/Cargo.toml", "[workspace]")]);

    let archive = session.open(&path);
    archive
        .add_files(
            vec![Entry::new("Cargo.toml")],
            Some(Entry::directory("project")),
            CompressionOptions::new().global_work_dir(dir.path().join("new")),
        )
        .unwrap()
        .start()
        .wait()
        .await
        .unwrap();
    assert_eq!(list(&archive).await.number_of_files, 3);

    let dest = dir.path().join("out");
    archive
        .copy_files(vec![Entry::new("project/Cargo.toml")], &dest, ExtractionOptions::new())
        .await
        .unwrap()
        .start()
        .wait()
        .await
        .unwrap();
    assert_eq!(read(&dest.join("Cargo.toml")), "[workspace]");
}

#[tokio::test]
async fn test_delete_directory() {
    let dir = TempDir::new().unwrap();
    let session = session(&dir);
    let path = project_archive(&dir, &session, "project.tar").await;

    let archive = session.open(&path);
    archive
        .delete_files(vec![Entry::directory("project/src")])
        .unwrap()
        .start()
        .wait()
        .await
        .unwrap();

    let summary = list(&archive).await;
    assert_eq!(summary.number_of_files, 1);
    assert!(!has(&summary, "project/src/"));
    assert!(has(&summary, "project/Cargo.toml"));
}

#[tokio::test]
async fn test_delete_missing_leaves_archive_untouched() {
    let dir = TempDir::new().unwrap();
    let session = session(&dir);
    let path = project_archive(&dir, &session, "project.tar").await;
    let before = fs::read(&path).unwrap();

    let err = session
        .open(&path)
        .delete_files(vec![Entry::new("project/ghost.rs")])
        .unwrap()
        .start()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EntryNotFound { .. }));
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[tokio::test]
async fn test_move_renames_member() {
    let dir = TempDir::new().unwrap();
    let session = session(&dir);
    let path = project_archive(&dir, &session, "project.tar").await;

    let archive = session.open(&path);
    archive
        .move_files(
            vec![Entry::new("project/src/lib.rs")],
            Entry::new("project/lib.rs"),
            CompressionOptions::new(),
        )
        .unwrap()
        .start()
        .wait()
        .await
        .unwrap();

    let summary = list(&archive).await;
    assert!(has(&summary, "project/lib.rs"));
    assert!(!has(&summary, "project/src/lib.rs"));
    assert_eq!(summary.number_of_files, 3);
}

#[tokio::test]
async fn test_move_several_into_directory() {
    let dir = TempDir::new().unwrap();
    let session = session(&dir);
    let path = project_archive(&dir, &session, "project.tar").await;

    let archive = session.open(&path);
    archive
        .move_files(
            vec![Entry::new("project/src/lib.rs"), Entry::new("project/Cargo.toml")],
            Entry::directory("moved"),
            CompressionOptions::new(),
        )
        .unwrap()
        .start()
        .wait()
        .await
        .unwrap();

    let summary = list(&archive).await;
    assert!(has(&summary, "moved/lib.rs"));
    assert!(has(&summary, "moved/Cargo.toml"));
    assert!(!summary.is_single_folder_archive);
}
