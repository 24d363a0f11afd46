//! Extraction jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::entry::Entry;
use crate::interface::SharedInterface;
use crate::options::ExtractionOptions;
use crate::safety::{self, PathSafety};
use crate::{Error, Result};

use super::{JobConfig, JobHandle, JobKind, job_settings, launch};

/// Extracts members to a directory on the filesystem.
///
/// An empty file list extracts everything.
pub struct ExtractJob {
    config: JobConfig,
    files: Vec<Entry>,
    destination: PathBuf,
    options: ExtractionOptions,
}

job_settings!(ExtractJob);

impl ExtractJob {
    /// Creates an extraction job with default options (flattening).
    pub fn new(interface: SharedInterface, files: Vec<Entry>, destination: impl Into<PathBuf>) -> Self {
        Self {
            config: JobConfig::new(interface),
            files,
            destination: destination.into(),
            options: ExtractionOptions::default(),
        }
    }

    /// Sets the extraction options.
    pub fn options(mut self, options: ExtractionOptions) -> Self {
        self.options = options;
        self
    }

    /// The requested members, after working-directory resolution.
    pub fn files(&self) -> Vec<Entry> {
        resolve_working_dir(&self.files, self.options.working_dir.as_deref())
    }

    /// Where the members are written.
    pub fn destination_directory(&self) -> &Path {
        &self.destination
    }

    /// The options in effect.
    pub fn extraction_options(&self) -> &ExtractionOptions {
        &self.options
    }

    /// Starts extracting.
    pub fn start(self) -> JobHandle<()> {
        let files = self.files();
        let Self {
            config,
            destination,
            options,
            ..
        } = self;

        launch(JobKind::Extract, config, None, move |runner| async move {
            validate_targets(&files, &destination, &options)?;
            tokio::fs::create_dir_all(&destination).await?;

            let interface = runner.interface().clone();
            let mut guard = interface.lock().await;
            let required = guard.copy_required_signals();
            let steps = runner
                .run(
                    |ctx| async move {
                        guard.copy_files(&files, &destination, &options, &ctx).await?;
                        Ok(ctx.steps_finished())
                    },
                    |_| {},
                )
                .await?;
            if steps + 1 < required {
                return Err(Error::failed(format!(
                    "Extraction reported {} of {required} completion signals",
                    steps + 1
                )));
            }
            Ok(())
        })
    }
}

/// Prepends the working directory to entries given relative to it.
fn resolve_working_dir(files: &[Entry], working_dir: Option<&str>) -> Vec<Entry> {
    let Some(dir) = working_dir.filter(|d| !d.is_empty()) else {
        return files.to_vec();
    };
    files
        .iter()
        .map(|entry| {
            let mut entry = entry.clone();
            if !entry.full_path().starts_with(dir) {
                entry.set_full_path(format!("{dir}{}", entry.full_path()));
            }
            if entry.root_node.is_none() {
                entry.root_node = Some(dir.trim_end_matches('/').to_string());
            }
            entry
        })
        .collect()
}

/// Rejects requests whose target would leave the destination.
fn validate_targets(files: &[Entry], destination: &Path, options: &ExtractionOptions) -> Result<()> {
    if options.path_safety == PathSafety::Disabled {
        return Ok(());
    }
    for entry in files {
        let relative = if options.preserve_paths {
            strip_root_node(entry)
        } else {
            entry.name().to_string()
        };
        if relative.is_empty() {
            continue;
        }
        safety::validate_extract_path(&relative, destination, options.path_safety)?;
    }
    Ok(())
}

/// Returns the entry's path relative to its root node.
pub(crate) fn strip_root_node(entry: &Entry) -> String {
    let path = entry.full_path();
    match entry.root_node.as_deref().filter(|r| !r.is_empty()) {
        Some(root) => {
            let root = root.trim_end_matches('/');
            match path.strip_prefix(root) {
                Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/').to_string(),
                _ => path.to_string(),
            }
        }
        None => path.to_string(),
    }
}

/// A member extracted to a scratch directory.
///
/// The scratch directory is removed when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct PreviewFile {
    path: PathBuf,
    _dir: Arc<TempDir>,
}

impl PreviewFile {
    /// Location of the extracted member.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Extracts one member into a job-local scratch directory, for previewing
/// or opening it with another application.
pub struct PreviewJob {
    config: JobConfig,
    entry: Entry,
    password_protected_hint: bool,
}

job_settings!(PreviewJob);

impl PreviewJob {
    /// Creates a preview job for `entry`.
    pub fn new(interface: SharedInterface, entry: Entry) -> Self {
        Self {
            config: JobConfig::new(interface),
            entry,
            password_protected_hint: false,
        }
    }

    /// Marks the archive as encrypted.
    pub fn password_protected_hint(mut self, hint: bool) -> Self {
        self.password_protected_hint = hint;
        self
    }

    /// The member being previewed.
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Starts extracting.
    pub fn start(self) -> JobHandle<PreviewFile> {
        let Self {
            config,
            entry,
            password_protected_hint,
        } = self;

        launch(JobKind::Preview, config, None, move |runner| async move {
            std::fs::create_dir_all(runner.scratch_dir())?;
            let dir = tempfile::Builder::new()
                .prefix("preview-")
                .tempdir_in(runner.scratch_dir())?;
            let options = ExtractionOptions::new()
                .preserve_paths(true)
                .password_protected_hint(password_protected_hint)
                .path_safety(PathSafety::Sanitize);

            let interface = runner.interface().clone();
            let mut guard = interface.lock().await;
            let target = dir.path().to_path_buf();
            let files = vec![entry.clone()];
            runner
                .run(
                    |ctx| async move { guard.copy_files(&files, &target, &options, &ctx).await },
                    |_| {},
                )
                .await?;

            let path = safety::validated_file_path(dir.path(), entry.full_path())?;
            if std::fs::symlink_metadata(&path).is_err() {
                return Err(Error::failed(format!(
                    "{} was not extracted",
                    entry.full_path()
                )));
            }
            Ok(PreviewFile {
                path,
                _dir: Arc::new(dir),
            })
        })
    }
}
