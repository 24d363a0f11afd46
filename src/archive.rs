//! The archive facade.
//!
//! An [`Archive`] binds one archive file to the backend chosen for it and
//! hands out jobs for every operation. It also caches what the first
//! listing revealed (single-folder layout, encryption, sizes) so callers
//! can query it without listing again.
//!
//! ```rust,no_run
//! use archivist::{ArchiveError, ExtractionOptions, Session};
//!
//! # async fn run() -> archivist::Result<()> {
//! let session = Session::new()?;
//! let archive = session.open("release.tar.gz");
//! if archive.error() != ArchiveError::NoError {
//!     eprintln!("cannot open: {:?}", archive.error());
//!     return Ok(());
//! }
//!
//! // Lists on first use.
//! if archive.is_single_folder_archive().await? {
//!     println!("everything lives in {}/", archive.subfolder_name().await?);
//! }
//!
//! let job = archive
//!     .copy_files(Vec::new(), "/tmp/out", ExtractionOptions::new().preserve_paths(true))
//!     .await?;
//! job.start().wait().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Cache invalidation
//!
//! - A successful listing refreshes every cached value.
//! - A successful add ends the single-folder layout unless it added below
//!   the common folder itself. Sizes and counts are re-read on next query.
//! - A delete or move, and any failed mutation, forces a full re-listing
//!   on the next query.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::entry::Entry;
use crate::interface::{ArchiveInterface, SharedInterface, share};
use crate::jobs::{AddJob, DeleteJob, ExtractJob, ListJob, MoveJob, PreviewJob};
use crate::options::{CompressionOptions, ExtractionOptions};
use crate::password::{Password, PasswordProvider};
use crate::paths::complete_base_name;
use crate::plugin::{PluginMetadata, PluginRegistry, detect_mime_type};
use crate::{Error, Result};

/// Whether a backend could be created for the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArchiveError {
    /// A backend is available.
    NoError,
    /// No plugin declares the archive's MIME type.
    NoPlugin,
    /// Plugins exist but none could be used.
    FailedPlugin,
}

/// How an archive is encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum EncryptionType {
    /// Nothing is encrypted.
    #[default]
    Unencrypted,
    /// Member contents are encrypted, the member list is not.
    Encrypted,
    /// The member list itself is encrypted.
    HeaderEncrypted,
}

#[derive(Debug, Clone, Default)]
struct ArchiveCache {
    listed: bool,
    contents_stale: bool,
    single_folder: bool,
    subfolder_name: String,
    encryption: EncryptionType,
    extracted_files_size: u64,
    number_of_files: usize,
}

type SharedCache = Arc<Mutex<ArchiveCache>>;

fn lock(cache: &SharedCache) -> MutexGuard<'_, ArchiveCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One archive file and the backend handling it.
pub struct Archive {
    path: PathBuf,
    mime_type: String,
    error: ArchiveError,
    error_message: Option<String>,
    plugin: Option<PluginMetadata>,
    interface: Option<SharedInterface>,
    read_only: bool,
    cache: SharedCache,
    scratch_dir: PathBuf,
    password_provider: Option<Arc<dyn PasswordProvider>>,
}

impl Archive {
    /// Selects a backend for `path` from `registry`.
    ///
    /// Never fails: selection problems are reported by [`error`](Self::error).
    pub fn create(
        path: &Path,
        fixed_mime: Option<&str>,
        registry: &PluginRegistry,
        scratch_dir: &Path,
    ) -> Self {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let mime_type = fixed_mime
            .map(str::to_string)
            .unwrap_or_else(|| detect_mime_type(&path));
        log::debug!("opening {} as {mime_type}", path.display());

        let mut archive = Self {
            path: path.clone(),
            mime_type,
            error: ArchiveError::NoError,
            error_message: None,
            plugin: None,
            interface: None,
            read_only: false,
            cache: SharedCache::default(),
            scratch_dir: scratch_dir.to_path_buf(),
            password_provider: None,
        };
        match registry.select(&path, Some(&archive.mime_type)) {
            Ok(selection) => {
                log::debug!("using plugin {}", selection.metadata.id);
                archive.read_only = selection.read_only;
                archive.plugin = Some(selection.metadata);
                archive.interface = Some(share(selection.interface));
            }
            Err(e) => {
                log::warn!("no usable plugin for {}: {e}", path.display());
                archive.error = match e {
                    Error::PluginNotFound { .. } => ArchiveError::NoPlugin,
                    _ => ArchiveError::FailedPlugin,
                };
                archive.error_message = Some(e.to_string());
            }
        }
        archive
    }

    /// Wraps an already created backend.
    pub fn from_interface(interface: Box<dyn ArchiveInterface>, scratch_dir: impl Into<PathBuf>) -> Self {
        let path = interface.filename().to_path_buf();
        Self {
            mime_type: detect_mime_type(&path),
            path,
            error: ArchiveError::NoError,
            error_message: None,
            plugin: None,
            interface: Some(share(interface)),
            read_only: false,
            cache: SharedCache::default(),
            scratch_dir: scratch_dir.into(),
            password_provider: None,
        }
    }

    /// Sets the provider asked whenever a job needs a password.
    pub fn set_password_provider(&mut self, provider: Arc<dyn PasswordProvider>) {
        self.password_provider = Some(provider);
    }

    /// Whether a backend could be created.
    pub fn error(&self) -> ArchiveError {
        self.error
    }

    /// Why no backend could be created.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Returns `true` when a backend is available.
    pub fn is_valid(&self) -> bool {
        self.error == ArchiveError::NoError
    }

    /// The plugin handling the archive.
    pub fn plugin(&self) -> Option<&PluginMetadata> {
        self.plugin.as_ref()
    }

    /// The backend, for driving jobs directly.
    pub fn interface(&self) -> Result<&SharedInterface> {
        self.interface.as_ref().ok_or_else(|| match self.error {
            ArchiveError::NoPlugin => Error::PluginNotFound {
                mime: self.mime_type.clone(),
            },
            _ => Error::PluginLoadFailed {
                plugin: self.mime_type.clone(),
                reason: self
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "no usable plugin".into()),
            },
        })
    }

    /// The archive file.
    pub fn file_name(&self) -> &Path {
        &self.path
    }

    /// The detected (or requested) MIME type.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The file name without extensions (`"archive.tar.gz"` → `"archive"`).
    pub fn complete_base_name(&self) -> String {
        complete_base_name(&self.path)
    }

    /// Size of the archive file.
    pub fn packed_size(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Whether mutating operations are refused.
    pub async fn is_read_only(&self) -> bool {
        match &self.interface {
            Some(iface) => self.read_only || iface.lock().await.is_read_only(),
            None => true,
        }
    }

    /// The archive comment (empty until listed).
    pub async fn comment(&self) -> String {
        match &self.interface {
            Some(iface) => iface.lock().await.comment().to_string(),
            None => String::new(),
        }
    }

    /// Whether the archive has a comment.
    pub async fn has_comment(&self) -> bool {
        !self.comment().await.is_empty()
    }

    /// Whether a listing has filled the cache.
    pub fn has_been_listed(&self) -> bool {
        lock(&self.cache).listed
    }

    /// Sets the password used by every following job and, for archives
    /// being written, whether the member list is encrypted as well.
    pub async fn encrypt(&self, password: impl Into<Password>, encrypt_header: bool) -> Result<()> {
        let iface = self.interface()?;
        {
            let mut guard = iface.lock().await;
            guard.set_password(Some(password.into()));
            guard.set_header_encryption_enabled(encrypt_header);
        }
        lock(&self.cache).encryption = if encrypt_header {
            EncryptionType::HeaderEncrypted
        } else {
            EncryptionType::Encrypted
        };
        Ok(())
    }

    async fn list_if_not_listed(&self, contents: bool) -> Result<()> {
        {
            let cache = lock(&self.cache);
            if cache.listed && !(contents && cache.contents_stale) {
                return Ok(());
            }
        }
        if !self.path.exists() {
            return Ok(());
        }
        self.list()?.start().wait().await.map(|_| ())
    }

    /// Whether every member lives below one top-level directory. Lists
    /// the archive first if needed.
    pub async fn is_single_folder_archive(&self) -> Result<bool> {
        self.list_if_not_listed(false).await?;
        Ok(lock(&self.cache).single_folder)
    }

    /// The common top-level directory, or the archive base name when there
    /// is none. Lists the archive first if needed.
    pub async fn subfolder_name(&self) -> Result<String> {
        self.list_if_not_listed(false).await?;
        let name = lock(&self.cache).subfolder_name.clone();
        Ok(if name.is_empty() {
            self.complete_base_name()
        } else {
            name
        })
    }

    /// How the archive is encrypted. Lists the archive first if needed.
    pub async fn encryption_type(&self) -> Result<EncryptionType> {
        self.list_if_not_listed(true).await?;
        Ok(lock(&self.cache).encryption)
    }

    /// Number of files (directories excluded). Lists the archive first if
    /// needed.
    pub async fn number_of_files(&self) -> Result<usize> {
        self.list_if_not_listed(true).await?;
        Ok(lock(&self.cache).number_of_files)
    }

    /// Total uncompressed size of the files. Lists the archive first if
    /// needed.
    pub async fn unpacked_size(&self) -> Result<u64> {
        self.list_if_not_listed(true).await?;
        Ok(lock(&self.cache).extracted_files_size)
    }

    /// A job listing the archive. Its result refreshes the cache.
    pub fn list(&self) -> Result<ListJob> {
        let iface = self.interface()?.clone();
        let cache = self.cache.clone();
        let job = ListJob::new(iface).with_hook(Box::new(move |result| {
            let Ok(summary) = result else {
                return;
            };
            let mut cache = lock(&cache);
            cache.listed = true;
            cache.contents_stale = false;
            cache.single_folder = summary.is_single_folder_archive;
            cache.subfolder_name = summary.subfolder_name.clone();
            cache.extracted_files_size = summary.extracted_files_size;
            cache.number_of_files = summary.number_of_files;
            if summary.is_header_encrypted {
                cache.encryption = EncryptionType::HeaderEncrypted;
            } else if summary.is_password_protected {
                cache.encryption = EncryptionType::Encrypted;
            }
        }));
        Ok(job.configured(self.scratch_dir.clone(), self.password_provider.clone()))
    }

    /// A job extracting `files` (everything when empty) to `destination`.
    ///
    /// The password-protected hint is set when the archive is encrypted.
    pub async fn copy_files(
        &self,
        files: Vec<Entry>,
        destination: impl Into<PathBuf>,
        options: ExtractionOptions,
    ) -> Result<ExtractJob> {
        let iface = self.interface()?.clone();
        let encryption = match self.encryption_type().await {
            Ok(encryption) => encryption,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                log::debug!("could not determine encryption before extracting: {e}");
                EncryptionType::Unencrypted
            }
        };
        let options = if encryption != EncryptionType::Unencrypted {
            options.password_protected_hint(true)
        } else {
            options
        };
        let job = ExtractJob::new(iface, files, destination).options(options);
        Ok(job.configured(self.scratch_dir.clone(), self.password_provider.clone()))
    }

    /// A job extracting one member to a scratch directory.
    pub fn preview(&self, entry: Entry) -> Result<PreviewJob> {
        let iface = self.interface()?.clone();
        let hint = lock(&self.cache).encryption != EncryptionType::Unencrypted;
        let job = PreviewJob::new(iface, entry).password_protected_hint(hint);
        Ok(job.configured(self.scratch_dir.clone(), self.password_provider.clone()))
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly {
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    /// A job adding filesystem paths under `destination` (the root when
    /// `None`).
    pub fn add_files(
        &self,
        files: Vec<Entry>,
        destination: Option<Entry>,
        options: CompressionOptions,
    ) -> Result<AddJob> {
        self.check_writable()?;
        let iface = self.interface()?.clone();
        let cache = self.cache.clone();
        let base_name = self.complete_base_name();
        let target_top = destination.as_ref().and_then(|d| {
            d.full_path()
                .split('/')
                .find(|c| !c.is_empty())
                .map(str::to_string)
        });

        let job = AddJob::new(iface, files, destination)
            .options(options)
            .with_hook(Box::new(move |result| {
                let mut cache = lock(&cache);
                cache.contents_stale = true;
                if result.is_err() {
                    return;
                }
                let inside_subfolder = target_top.as_deref() == Some(cache.subfolder_name.as_str());
                if cache.single_folder && !inside_subfolder {
                    cache.single_folder = false;
                    cache.subfolder_name = base_name;
                }
            }));
        Ok(job.configured(self.scratch_dir.clone(), self.password_provider.clone()))
    }

    /// A job deleting members.
    pub fn delete_files(&self, files: Vec<Entry>) -> Result<DeleteJob> {
        self.check_writable()?;
        let iface = self.interface()?.clone();
        let cache = self.cache.clone();
        let job = DeleteJob::new(iface, files).with_hook(Box::new(move |_| {
            lock(&cache).listed = false;
        }));
        Ok(job.configured(self.scratch_dir.clone(), self.password_provider.clone()))
    }

    /// A job moving members below (or, for a single member, onto)
    /// `destination`.
    pub fn move_files(
        &self,
        files: Vec<Entry>,
        destination: Entry,
        options: CompressionOptions,
    ) -> Result<MoveJob> {
        self.check_writable()?;
        let iface = self.interface()?.clone();
        let cache = self.cache.clone();
        let job = MoveJob::new(iface, files, destination)
            .options(options)
            .with_hook(Box::new(move |_| {
                lock(&cache).listed = false;
            }));
        Ok(job.configured(self.scratch_dir.clone(), self.password_provider.clone()))
    }
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("mime_type", &self.mime_type)
            .field("error", &self.error)
            .field("plugin", &self.plugin.as_ref().map(|p| p.id.as_str()))
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}
