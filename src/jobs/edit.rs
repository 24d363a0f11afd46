//! Mutating jobs: add, delete and move.
//!
//! All three refuse to run against a read-only archive and never report a
//! partial result as success.

use crate::entry::Entry;
use crate::interface::SharedInterface;
use crate::options::CompressionOptions;
use crate::Error;

use super::{FinishHook, JobConfig, JobHandle, JobKind, job_settings, launch};

/// Adds filesystem paths to an archive.
///
/// Each entry's full path names a file or directory on disk, relative to
/// [`CompressionOptions::global_work_dir`] when set. Directories are added
/// recursively.
pub struct AddJob {
    config: JobConfig,
    files: Vec<Entry>,
    destination: Option<Entry>,
    options: CompressionOptions,
    hook: Option<FinishHook<()>>,
}

job_settings!(AddJob);

impl AddJob {
    /// Creates an add job placing `files` under `destination` (the root when `None`).
    pub fn new(interface: SharedInterface, files: Vec<Entry>, destination: Option<Entry>) -> Self {
        Self {
            config: JobConfig::new(interface),
            files,
            destination,
            options: CompressionOptions::default(),
            hook: None,
        }
    }

    /// Sets the compression options.
    pub fn options(mut self, options: CompressionOptions) -> Self {
        self.options = options;
        self
    }

    pub(crate) fn with_hook(mut self, hook: FinishHook<()>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// The entries to add.
    pub fn files(&self) -> &[Entry] {
        &self.files
    }

    /// The destination directory inside the archive.
    pub fn destination(&self) -> Option<&Entry> {
        self.destination.as_ref()
    }

    /// Starts adding.
    pub fn start(self) -> JobHandle<()> {
        let Self {
            config,
            files,
            destination,
            options,
            hook,
        } = self;

        launch(JobKind::Add, config, hook, move |runner| async move {
            if let Some(dest) = &destination {
                if !dest.is_dir() {
                    return Err(Error::InvalidEntry(format!(
                        "destination {} is not a directory",
                        dest.full_path()
                    )));
                }
            }
            if files.is_empty() {
                return Err(Error::InvalidEntry("nothing to add".into()));
            }

            let interface = runner.interface().clone();
            let mut guard = interface.lock().await;
            if guard.is_read_only() {
                return Err(Error::ReadOnly {
                    path: guard.filename().to_path_buf(),
                });
            }
            runner
                .run(
                    |ctx| async move {
                        guard
                            .add_files(&files, destination.as_ref(), &options, &ctx)
                            .await
                    },
                    |_| {},
                )
                .await
        })
    }
}

/// Deletes members; directories are removed with their descendants.
pub struct DeleteJob {
    config: JobConfig,
    files: Vec<Entry>,
    hook: Option<FinishHook<()>>,
}

job_settings!(DeleteJob);

impl DeleteJob {
    /// Creates a delete job.
    pub fn new(interface: SharedInterface, files: Vec<Entry>) -> Self {
        Self {
            config: JobConfig::new(interface),
            files,
            hook: None,
        }
    }

    pub(crate) fn with_hook(mut self, hook: FinishHook<()>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// The members to delete.
    pub fn files(&self) -> &[Entry] {
        &self.files
    }

    /// Starts deleting.
    pub fn start(self) -> JobHandle<()> {
        let Self {
            config,
            files,
            hook,
        } = self;

        launch(JobKind::Delete, config, hook, move |runner| async move {
            let interface = runner.interface().clone();
            let mut guard = interface.lock().await;
            if guard.is_read_only() {
                return Err(Error::ReadOnly {
                    path: guard.filename().to_path_buf(),
                });
            }
            runner
                .run(
                    |ctx| async move {
                        guard.delete_files(&files, &ctx).await?;
                        for file in &files {
                            ctx.entry_removed(file.full_path());
                        }
                        Ok(())
                    },
                    |_| {},
                )
                .await
        })
    }
}

/// Moves members to a new location inside the archive.
///
/// With several top-level members the destination is a directory they are
/// moved into; with exactly one, the destination is its new full path.
pub struct MoveJob {
    config: JobConfig,
    files: Vec<Entry>,
    destination: Entry,
    options: CompressionOptions,
    hook: Option<FinishHook<()>>,
}

job_settings!(MoveJob);

impl MoveJob {
    /// Creates a move job.
    pub fn new(interface: SharedInterface, files: Vec<Entry>, destination: Entry) -> Self {
        Self {
            config: JobConfig::new(interface),
            files,
            destination,
            options: CompressionOptions::default(),
            hook: None,
        }
    }

    /// Sets the compression options used when the backend re-adds files.
    pub fn options(mut self, options: CompressionOptions) -> Self {
        self.options = options;
        self
    }

    pub(crate) fn with_hook(mut self, hook: FinishHook<()>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// The members to move.
    pub fn files(&self) -> &[Entry] {
        &self.files
    }

    /// The destination entry.
    pub fn destination(&self) -> &Entry {
        &self.destination
    }

    /// Starts moving.
    pub fn start(self) -> JobHandle<()> {
        let Self {
            config,
            files,
            destination,
            options,
            hook,
        } = self;

        launch(JobKind::Move, config, hook, move |runner| async move {
            if files.is_empty() {
                return Err(Error::InvalidEntry("nothing to move".into()));
            }
            let interface = runner.interface().clone();
            let mut guard = interface.lock().await;
            if guard.is_read_only() {
                return Err(Error::ReadOnly {
                    path: guard.filename().to_path_buf(),
                });
            }
            let required = guard.move_required_signals();
            let steps = runner
                .run(
                    |ctx| async move {
                        guard.move_files(&files, &destination, &options, &ctx).await?;
                        Ok(ctx.steps_finished())
                    },
                    |_| {},
                )
                .await?;
            if steps + 1 != required {
                return Err(Error::failed(format!(
                    "Move reported {} of {required} completion signals",
                    steps + 1
                )));
            }
            Ok(())
        })
    }
}
