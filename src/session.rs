//! Explicit context shared by the archives of one run.
//!
//! A [`Session`] owns the plugin registry and a scratch directory. Jobs of
//! every archive opened through the session stage their temporary files
//! below that directory, which is removed when the session is dropped.
//!
//! ```rust,no_run
//! use archivist::{Session, SessionConfig};
//!
//! # fn main() -> archivist::Result<()> {
//! let session = Session::with_config(
//!     SessionConfig::new()
//!         .temp_root("/var/tmp")
//!         .disable_plugin("cliunarchiver"),
//! )?;
//! let archive = session.open("backup.tar.xz");
//! assert!(archive.is_valid());
//! # Ok(())
//! # }
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::archive::Archive;
use crate::plugin::PluginRegistry;
use crate::Result;

/// Configuration of a [`Session`].
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Parent of the scratch directory (the system temporary directory when
    /// `None`).
    pub temp_root: Option<PathBuf>,
    /// Plugin ids excluded from selection.
    pub disabled_plugins: Vec<String>,
    /// Where executables are looked up (`PATH` when `None`).
    pub search_path: Option<OsString>,
}

impl SessionConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Places the scratch directory below `dir`.
    pub fn temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(dir.into());
        self
    }

    /// Excludes a plugin from selection.
    pub fn disable_plugin(mut self, id: impl Into<String>) -> Self {
        self.disabled_plugins.push(id.into());
        self
    }

    /// Looks up executables in `path` instead of `PATH`.
    pub fn search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }
}

/// Scratch directory and plugin registry for a run.
#[derive(Debug)]
pub struct Session {
    registry: Arc<PluginRegistry>,
    scratch: TempDir,
}

impl Session {
    /// Creates a session with the built-in plugins.
    pub fn new() -> Result<Self> {
        Self::with_config(SessionConfig::new())
    }

    /// Creates a session with the built-in plugins and `config`.
    pub fn with_config(config: SessionConfig) -> Result<Self> {
        Self::with_registry(config, PluginRegistry::builtin())
    }

    /// Creates a session with a custom registry.
    pub fn with_registry(config: SessionConfig, mut registry: PluginRegistry) -> Result<Self> {
        for id in &config.disabled_plugins {
            if !registry.set_enabled(id, false) {
                log::warn!("cannot disable unknown plugin {id}");
            }
        }
        if config.search_path.is_some() {
            registry.set_search_path(config.search_path.clone());
        }

        let root = config.temp_root.unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&root)?;
        let scratch = tempfile::Builder::new()
            .prefix("archivist-")
            .tempdir_in(&root)?;
        log::debug!("session scratch directory: {}", scratch.path().display());

        Ok(Self {
            registry: Arc::new(registry),
            scratch,
        })
    }

    /// The plugin registry.
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// The scratch directory.
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Opens an existing archive, detecting its type.
    ///
    /// Selection failures are reported by [`Archive::error`].
    pub fn open(&self, path: impl AsRef<Path>) -> Archive {
        Archive::create(path.as_ref(), None, &self.registry, self.scratch.path())
    }

    /// Opens or creates an archive of the given MIME type.
    pub fn create(&self, path: impl AsRef<Path>, mime: &str) -> Archive {
        Archive::create(path.as_ref(), Some(mime), &self.registry, self.scratch.path())
    }

    /// Removes the scratch directory, reporting failures.
    pub fn close(self) -> Result<()> {
        self.scratch.close()?;
        Ok(())
    }
}
