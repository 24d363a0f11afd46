//! Options consumed by backends during extraction and compression.
//!
//! Both option types follow the builder pattern:
//!
//! ```rust
//! use archivist::{CompressionOptions, ExtractionOptions};
//!
//! let extract = ExtractionOptions::new().preserve_paths(true).always_use_tmp_dir(true);
//! assert!(extract.preserve_paths);
//!
//! let compress = CompressionOptions::new().global_work_dir("/home/me/project").compression_level(3);
//! assert_eq!(compress.compression_level, Some(3));
//! ```

use std::path::PathBuf;

use crate::safety::PathSafety;

/// Options for extracting (copying) entries to the filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionOptions {
    /// Recreate the archive directory structure. When `false`, every file is
    /// written directly into the destination under its base name.
    pub preserve_paths: bool,
    /// Archive directory that requested entries are relative to. Entries
    /// given without this prefix get it prepended, and a preserve-path
    /// extraction places them relative to it.
    pub working_dir: Option<String>,
    /// Informational: the archive is known to be encrypted.
    pub password_protected_hint: bool,
    /// Extract into a scratch directory first, then move the files to the
    /// destination.
    pub always_use_tmp_dir: bool,
    /// How member paths are validated before anything is written.
    pub path_safety: PathSafety,
}

impl ExtractionOptions {
    /// Creates options with the defaults (flattening extraction, strict path safety).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether archive directories are recreated.
    pub fn preserve_paths(mut self, preserve: bool) -> Self {
        self.preserve_paths = preserve;
        self
    }

    /// Sets the archive directory requested entries are relative to.
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        let mut dir = dir.into();
        if !dir.is_empty() && !dir.ends_with('/') {
            dir.push('/');
        }
        self.working_dir = Some(dir);
        self
    }

    /// Marks the archive as encrypted.
    pub fn password_protected_hint(mut self, hint: bool) -> Self {
        self.password_protected_hint = hint;
        self
    }

    /// Forces extraction through a scratch directory.
    pub fn always_use_tmp_dir(mut self, always: bool) -> Self {
        self.always_use_tmp_dir = always;
        self
    }

    /// Sets the path validation policy.
    pub fn path_safety(mut self, policy: PathSafety) -> Self {
        self.path_safety = policy;
        self
    }
}

/// Options for adding files to an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompressionOptions {
    /// Base directory that relative source paths are resolved against.
    pub global_work_dir: Option<PathBuf>,
    /// Backend-defined compression level.
    pub compression_level: Option<u32>,
}

impl CompressionOptions {
    /// Creates options with the backend defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base directory for relative source paths.
    pub fn global_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.global_work_dir = Some(dir.into());
        self
    }

    /// Sets the compression level.
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = Some(level);
        self
    }

    /// Resolves a source path given by an entry against the work directory.
    pub fn resolve_source(&self, path: &str) -> PathBuf {
        let trimmed = path.trim_end_matches('/');
        match &self.global_work_dir {
            Some(dir) => dir.join(trimmed),
            None => PathBuf::from(trimmed),
        }
    }
}
