//! Archive facade tests.
//!
//! Covers the lazily filled listing cache, encryption detection, the
//! read-only guard and plugin selection through a [`Session`].

use std::sync::Arc;

use archivist::plugin::MIME_TAR;
use archivist::{
    Archive, ArchiveError, CompressionOptions, EncryptionType, Entry, Error, ExtractionOptions,
    Session, SessionConfig, StaticPassword,
};
use tempfile::TempDir;

mod common;

use common::{FixtureInterface, scripted_passwords, write_tree};

fn fixture_archive(name: &str, scratch: &TempDir) -> Archive {
    Archive::from_interface(Box::new(FixtureInterface::from_data(name)), scratch.path())
}

// =============================================================================
// Cached properties
// =============================================================================

#[tokio::test]
async fn test_properties_list_on_demand() {
    let scratch = TempDir::new().unwrap();
    let archive = fixture_archive("photos.json", &scratch);
    assert!(archive.is_valid());
    assert!(!archive.has_been_listed());
    assert!(!archive.has_comment().await);

    assert!(archive.is_single_folder_archive().await.unwrap());
    assert!(archive.has_been_listed());
    assert_eq!(archive.subfolder_name().await.unwrap(), "photos");
    assert_eq!(archive.number_of_files().await.unwrap(), 4);
    assert_eq!(archive.unpacked_size().await.unwrap(), 76);
    assert_eq!(archive.comment().await, "Holiday pictures");
    assert_eq!(archive.encryption_type().await.unwrap(), EncryptionType::Unencrypted);
}

#[tokio::test]
async fn test_listing_is_cached() {
    let scratch = TempDir::new().unwrap();
    let fixture = FixtureInterface::from_data("photos.json");
    let calls = fixture.calls();
    let archive = Archive::from_interface(Box::new(fixture), scratch.path());

    archive.number_of_files().await.unwrap();
    archive.subfolder_name().await.unwrap();
    archive.unpacked_size().await.unwrap();
    assert_eq!(calls.lock().unwrap().as_slice(), ["list"]);
}

#[tokio::test]
async fn test_subfolder_falls_back_to_base_name() {
    let scratch = TempDir::new().unwrap();
    let archive = fixture_archive("mixed.json", &scratch);
    assert!(!archive.is_single_folder_archive().await.unwrap());
    assert_eq!(archive.subfolder_name().await.unwrap(), "mixed");
    assert_eq!(archive.complete_base_name(), "mixed");
}

// =============================================================================
// Encryption
// =============================================================================

#[tokio::test]
async fn test_encrypted_members() {
    let scratch = TempDir::new().unwrap();
    let archive = fixture_archive("mixed.json", &scratch);
    assert_eq!(archive.encryption_type().await.unwrap(), EncryptionType::Encrypted);
}

#[tokio::test]
async fn test_header_encrypted_needs_provider() {
    let scratch = TempDir::new().unwrap();
    let archive = fixture_archive("secret.json", &scratch);
    let err = archive.encryption_type().await.unwrap_err();
    assert!(matches!(err, Error::PasswordRequired));
    assert!(!archive.has_been_listed());

    let mut archive = fixture_archive("secret.json", &scratch);
    archive.set_password_provider(scripted_passwords(&["hunter2"]));
    assert_eq!(
        archive.encryption_type().await.unwrap(),
        EncryptionType::HeaderEncrypted
    );
}

#[tokio::test]
async fn test_encrypt_sets_backend_password() {
    let scratch = TempDir::new().unwrap();
    let archive = fixture_archive("photos.json", &scratch);
    archive.encrypt("s3cret", true).await.unwrap();

    let iface = archive.interface().unwrap().lock().await;
    assert_eq!(iface.password().map(|p| p.as_str()), Some("s3cret"));
    assert!(iface.is_header_encryption_enabled());
}

#[tokio::test]
async fn test_copy_files_uses_provider() {
    let scratch = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let mut archive = fixture_archive("mixed.json", &scratch);
    archive.set_password_provider(Arc::new(StaticPassword::new("hunter2")));

    let job = archive
        .copy_files(
            vec![Entry::new("docs/guide.txt")],
            dest.path(),
            ExtractionOptions::new().preserve_paths(true),
        )
        .await
        .unwrap();
    assert!(job.extraction_options().password_protected_hint);
    job.start().wait().await.unwrap();
    assert!(dest.path().join("docs/guide.txt").is_file());
}

// =============================================================================
// Editing
// =============================================================================

#[tokio::test]
async fn test_add_outside_subfolder_breaks_single_folder() {
    let scratch = TempDir::new().unwrap();
    let src = TempDir::new().unwrap();
    write_tree(src.path(), &[("top.txt", "top")]);
    let archive = fixture_archive("photos.json", &scratch);
    assert!(archive.is_single_folder_archive().await.unwrap());

    archive
        .add_files(
            vec![Entry::new("top.txt")],
            None,
            CompressionOptions::new().global_work_dir(src.path()),
        )
        .unwrap()
        .start()
        .wait()
        .await
        .unwrap();

    assert!(!archive.is_single_folder_archive().await.unwrap());
    assert_eq!(archive.subfolder_name().await.unwrap(), "photos");
    // Contents are relisted after an add.
    assert_eq!(archive.number_of_files().await.unwrap(), 5);
}

#[tokio::test]
async fn test_add_inside_subfolder_keeps_single_folder() {
    let scratch = TempDir::new().unwrap();
    let src = TempDir::new().unwrap();
    write_tree(src.path(), &[("more.jpg", "more")]);
    let archive = fixture_archive("photos.json", &scratch);
    assert!(archive.is_single_folder_archive().await.unwrap());

    archive
        .add_files(
            vec![Entry::new("more.jpg")],
            Some(Entry::directory("photos")),
            CompressionOptions::new().global_work_dir(src.path()),
        )
        .unwrap()
        .start()
        .wait()
        .await
        .unwrap();
    assert!(archive.is_single_folder_archive().await.unwrap());
    assert_eq!(archive.subfolder_name().await.unwrap(), "photos");
}

#[tokio::test]
async fn test_delete_invalidates_cache() {
    let scratch = TempDir::new().unwrap();
    let archive = fixture_archive("mixed.json", &scratch);
    assert_eq!(archive.number_of_files().await.unwrap(), 4);

    archive
        .delete_files(vec![Entry::new("README.txt"), Entry::new("bin/tool")])
        .unwrap()
        .start()
        .wait()
        .await
        .unwrap();
    assert!(!archive.has_been_listed());
    assert_eq!(archive.number_of_files().await.unwrap(), 2);
}

#[tokio::test]
async fn test_read_only_backend_refuses_delete() {
    let scratch = TempDir::new().unwrap();
    let archive = Archive::from_interface(
        Box::new(FixtureInterface::from_data("photos.json").read_only()),
        scratch.path(),
    );
    assert!(archive.is_read_only().await);

    let err = archive
        .delete_files(vec![Entry::new("photos/beach.jpg")])
        .unwrap()
        .start()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReadOnly { .. }));
}

#[tokio::test]
async fn test_preview_through_facade() {
    let scratch = TempDir::new().unwrap();
    let archive = fixture_archive("photos.json", &scratch);
    let preview = archive
        .preview(Entry::new("photos/sunset.jpg"))
        .unwrap()
        .start()
        .wait()
        .await
        .unwrap();
    assert!(preview.path().starts_with(scratch.path()));
    assert_eq!(std::fs::read_to_string(preview.path()).unwrap(), "sunset!");
}

// =============================================================================
// Plugin selection
// =============================================================================

#[tokio::test]
async fn test_unknown_type_has_no_plugin() {
    let dir = TempDir::new().unwrap();
    let session = Session::with_config(SessionConfig::new().temp_root(dir.path())).unwrap();
    let archive = session.open(dir.path().join("notes.unknownext"));

    assert_eq!(archive.error(), ArchiveError::NoPlugin);
    assert!(!archive.is_valid());
    assert!(archive.is_read_only().await);
    assert!(matches!(archive.list(), Err(Error::PluginNotFound { .. })));
}

#[tokio::test]
async fn test_disabled_plugins_fail_selection() {
    let dir = TempDir::new().unwrap();
    let empty_path = TempDir::new().unwrap();
    let session = Session::with_config(
        SessionConfig::new()
            .temp_root(dir.path())
            .disable_plugin("tar")
            .search_path(empty_path.path()),
    )
    .unwrap();
    let archive = session.create(dir.path().join("new.tar"), MIME_TAR);

    assert_eq!(archive.error(), ArchiveError::FailedPlugin);
    assert!(archive.error_message().is_some());
    assert!(matches!(archive.interface(), Err(Error::PluginLoadFailed { .. })));
}

#[tokio::test]
async fn test_builtin_tar_is_preferred() {
    let dir = TempDir::new().unwrap();
    let session = Session::with_config(SessionConfig::new().temp_root(dir.path())).unwrap();
    let archive = session.create(dir.path().join("new.tar"), MIME_TAR);

    assert!(archive.is_valid());
    assert_eq!(archive.plugin().map(|p| p.id.as_str()), Some("tar"));
    assert!(!archive.is_read_only().await);
    // A missing archive lists as empty.
    assert_eq!(archive.number_of_files().await.unwrap(), 0);
}
