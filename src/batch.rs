//! Compressing a set of files into a new archive in one go.
//!
//! ```rust,no_run
//! use archivist::{AddToArchive, Session};
//!
//! # async fn run() -> archivist::Result<()> {
//! let session = Session::new()?;
//! let created = AddToArchive::new()
//!     .add_input("/home/me/photos/a.jpg")
//!     .add_input("/home/me/photos/b.jpg")
//!     .auto_filename_suffix("tar.gz")
//!     .change_to_first_path(true)
//!     .run(&session)
//!     .await?;
//! // "/home/me/photos/photos.tar.gz", or "photos_1.tar.gz" if that existed.
//! println!("created {}", created.display());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use crate::archive::Archive;
use crate::entry::Entry;
use crate::jobs::AddJob;
use crate::options::CompressionOptions;
use crate::password::Password;
use crate::plugin::mime_type_from_name;
use crate::session::Session;
use crate::{ArchiveError, Error, Result};

/// Builder for a batch compression.
#[derive(Debug, Clone, Default)]
pub struct AddToArchive {
    inputs: Vec<PathBuf>,
    filename: Option<PathBuf>,
    mime_type: Option<String>,
    auto_filename_suffix: Option<String>,
    change_to_first_path: bool,
    password: Option<Password>,
    header_encryption: bool,
    compression_level: Option<u32>,
}

impl AddToArchive {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file or directory to compress.
    pub fn add_input(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        self.inputs
            .push(std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()));
        self
    }

    /// The archive to create.
    pub fn filename(mut self, path: impl Into<PathBuf>) -> Self {
        self.filename = Some(path.into());
        self
    }

    /// Forces the archive type instead of deriving it from the name.
    pub fn mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    /// Derives the archive name from the inputs, with this extension
    /// (`"tar.gz"`, `"7z"`).
    pub fn auto_filename_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.auto_filename_suffix = Some(suffix.into().trim_start_matches('.').to_string());
        self
    }

    /// Stores inputs relative to the first input's directory instead of by
    /// base name.
    pub fn change_to_first_path(mut self, enabled: bool) -> Self {
        self.change_to_first_path = enabled;
        self
    }

    /// Encrypts the new archive.
    pub fn password(mut self, password: impl Into<Password>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Encrypts the member list too (needs a password).
    pub fn header_encryption(mut self, enabled: bool) -> Self {
        self.header_encryption = enabled;
        self
    }

    /// Sets the backend compression level.
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = Some(level);
        self
    }

    /// The inputs, made absolute.
    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    fn first_path(&self) -> Result<&Path> {
        self.inputs
            .first()
            .and_then(|p| p.parent())
            .ok_or_else(|| Error::InvalidEntry("no input files were given".into()))
    }

    /// The archive path without extension derived from the inputs.
    ///
    /// A single input gives its name without extension, several inputs the
    /// name of their directory. The result lives in that directory.
    pub fn detect_base_name(&self) -> Result<PathBuf> {
        let first = self
            .inputs
            .first()
            .ok_or_else(|| Error::InvalidEntry("no input files were given".into()))?;
        let parent = self.first_path()?;
        let file_name = first
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut base = if self.inputs.len() > 1 {
            parent
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else if mime_type_from_name(first).is_some() {
            match file_name.rfind('.') {
                Some(dot) if dot > 0 => file_name[..dot].to_string(),
                _ => file_name,
            }
        } else {
            file_name
        };
        if base.to_ascii_lowercase().ends_with(".tar") {
            base.truncate(base.len() - 4);
        }
        if base.is_empty() {
            base = "archive".into();
        }
        Ok(parent.join(base))
    }

    /// The archive that will be created.
    ///
    /// With an automatic name, `_1`, `_2`, ... are appended until the name
    /// is free.
    pub fn archive_path(&self) -> Result<PathBuf> {
        if let Some(filename) = &self.filename {
            return Ok(filename.clone());
        }
        let suffix = self.auto_filename_suffix.as_deref().ok_or_else(|| {
            Error::InvalidEntry(
                "either an archive file name or an automatic filename suffix is needed".into(),
            )
        })?;
        let base = self.detect_base_name()?;
        let with_suffix = |n: usize| {
            let mut name = base.clone().into_os_string();
            if n > 0 {
                name.push(format!("_{n}"));
            }
            name.push(format!(".{suffix}"));
            PathBuf::from(name)
        };
        let mut n = 0;
        let mut candidate = with_suffix(n);
        while candidate.exists() {
            n += 1;
            candidate = with_suffix(n);
        }
        Ok(candidate)
    }

    fn entries(&self) -> Result<(Vec<Entry>, CompressionOptions)> {
        let mut options = CompressionOptions::new();
        if let Some(level) = self.compression_level {
            options = options.compression_level(level);
        }
        if !self.change_to_first_path {
            let entries = self
                .inputs
                .iter()
                .map(|p| entry_for(p, &p.to_string_lossy()))
                .collect();
            return Ok((entries, options));
        }

        let base = self.first_path()?.to_path_buf();
        let entries = self
            .inputs
            .iter()
            .map(|p| {
                let relative = p.strip_prefix(&base).unwrap_or(p);
                entry_for(p, &relative.to_string_lossy())
            })
            .collect();
        log::debug!("setting the work directory to {}", base.display());
        Ok((entries, options.global_work_dir(base)))
    }

    /// Opens the new archive and prepares the add job.
    pub async fn prepare(&self, session: &Session) -> Result<(Archive, AddJob)> {
        if self.inputs.is_empty() {
            return Err(Error::InvalidEntry("no input files were given".into()));
        }
        let path = self.archive_path()?;
        let archive = match &self.mime_type {
            Some(mime) => session.create(&path, mime),
            None => session.open(&path),
        };
        if archive.error() != ArchiveError::NoError {
            return Err(archive
                .interface()
                .err()
                .unwrap_or_else(|| Error::failed("Failed to create the new archive")));
        }
        if archive.is_read_only().await {
            return Err(Error::failed(
                "It is not possible to create archives of this type",
            ));
        }
        if let Some(password) = &self.password {
            if !password.is_empty() {
                archive.encrypt(password.clone(), self.header_encryption).await?;
            }
        }
        let (entries, options) = self.entries()?;
        let job = archive.add_files(entries, None, options)?;
        Ok((archive, job))
    }

    /// Creates the archive and waits for it, returning its path.
    pub async fn run(self, session: &Session) -> Result<PathBuf> {
        let (archive, job) = self.prepare(session).await?;
        job.start().wait().await?;
        Ok(archive.file_name().to_path_buf())
    }
}

fn entry_for(source: &Path, full_path: &str) -> Entry {
    if source.is_dir() {
        Entry::directory(full_path)
    } else {
        Entry::new(full_path)
    }
}
