//! The backend contract.
//!
//! Every archive technology (a CLI tool, a native library) is adapted to the
//! [`ArchiveInterface`] trait. A backend owns an [`InterfaceState`] with the
//! archive path and credentials, declares its [`Capabilities`], and reports
//! everything it discovers through the [`JobContext`] of the job driving it.
//!
//! Backends never talk to the caller directly: entries, progress and
//! diagnostics go through the context, the terminal outcome is the returned
//! `Result`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::entry::Entry;
use crate::jobs::JobEvent;
use crate::options::{CompressionOptions, ExtractionOptions};
use crate::password::{Password, PasswordProvider, PasswordQuery};
use crate::{Error, Result};

/// A backend shared between the facade and the jobs it spawns.
///
/// The mutex serializes operations on one archive.
pub type SharedInterface = Arc<tokio::sync::Mutex<Box<dyn ArchiveInterface>>>;

/// Wraps a backend for use by jobs.
pub fn share(interface: Box<dyn ArchiveInterface>) -> SharedInterface {
    Arc::new(tokio::sync::Mutex::new(interface))
}

/// What a backend can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Members can be extracted.
    pub can_extract: bool,
    /// Files can be added.
    pub can_add: bool,
    /// Members can be deleted.
    pub can_delete: bool,
    /// Members can be moved or renamed.
    pub can_move: bool,
    /// The backend never writes.
    pub read_only: bool,
    /// The backend drives external executables.
    pub cli_based: bool,
}

impl Capabilities {
    /// List and extract only.
    pub const fn read_only() -> Self {
        Self {
            can_extract: true,
            can_add: false,
            can_delete: false,
            can_move: false,
            read_only: true,
            cli_based: false,
        }
    }

    /// Every operation.
    pub const fn read_write() -> Self {
        Self {
            can_extract: true,
            can_add: true,
            can_delete: true,
            can_move: true,
            read_only: false,
            cli_based: false,
        }
    }

    /// Marks the backend as driving external executables.
    pub const fn cli(mut self) -> Self {
        self.cli_based = true;
        self
    }
}

/// State every backend carries.
#[derive(Debug, Clone, Default)]
pub struct InterfaceState {
    /// The archive file.
    pub filename: PathBuf,
    /// Archive comment, filled in by `list`.
    pub comment: String,
    /// Password used for encrypted archives.
    pub password: Option<Password>,
    /// Whether the member list itself is encrypted (or should be, on add).
    pub header_encryption: bool,
    /// Set when the backend detected damage.
    pub corrupt: bool,
}

impl InterfaceState {
    /// Creates the state for `filename`.
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            ..Self::default()
        }
    }
}

/// Returns `true` if an archive at `path` cannot be written.
///
/// An existing file must be writable; a file that does not exist yet needs
/// an existing parent directory.
pub fn is_path_read_only(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.permissions().readonly(),
        Err(_) => {
            let parent = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            !parent.is_dir()
        }
    }
}

/// A capability-tagged adapter performing archive operations with one
/// concrete technology.
///
/// Only [`list`](Self::list) and [`copy_files`](Self::copy_files) are
/// mandatory; mutating operations default to [`Error::Unsupported`].
#[async_trait]
pub trait ArchiveInterface: Send + Sync {
    /// Short backend name for diagnostics.
    fn name(&self) -> &str;

    /// What this backend supports.
    fn capabilities(&self) -> Capabilities;

    /// Shared state.
    fn state(&self) -> &InterfaceState;

    /// Shared state, mutably.
    fn state_mut(&mut self) -> &mut InterfaceState;

    /// The archive file.
    fn filename(&self) -> &Path {
        &self.state().filename
    }

    /// The archive comment (empty until listed).
    fn comment(&self) -> &str {
        &self.state().comment
    }

    /// The configured password.
    fn password(&self) -> Option<&Password> {
        self.state().password.as_ref()
    }

    /// Sets or clears the password.
    fn set_password(&mut self, password: Option<Password>) {
        self.state_mut().password = password;
    }

    /// Whether header encryption is on.
    fn is_header_encryption_enabled(&self) -> bool {
        self.state().header_encryption
    }

    /// Enables header encryption.
    fn set_header_encryption_enabled(&mut self, enabled: bool) {
        self.state_mut().header_encryption = enabled;
    }

    /// Whether damage was detected.
    fn is_corrupt(&self) -> bool {
        self.state().corrupt
    }

    /// Marks the archive as damaged, which makes it read-only.
    fn set_corrupt(&mut self, corrupt: bool) {
        self.state_mut().corrupt = corrupt;
    }

    /// Whether mutating operations are refused.
    fn is_read_only(&self) -> bool {
        self.capabilities().read_only || self.is_corrupt() || is_path_read_only(self.filename())
    }

    /// Completion signals a move emits (each sub-operation counts one).
    fn move_required_signals(&self) -> usize {
        1
    }

    /// Completion signals an extraction emits.
    fn copy_required_signals(&self) -> usize {
        1
    }

    /// Prepares the backend for listing. Most backends need nothing.
    async fn open(&mut self, _ctx: &JobContext) -> Result<()> {
        Ok(())
    }

    /// Reports every member through [`JobContext::entry`].
    ///
    /// Calling it again lists from scratch.
    async fn list(&mut self, ctx: &JobContext) -> Result<()>;

    /// Extracts `files` (all members when empty) below `destination`.
    async fn copy_files(
        &mut self,
        files: &[Entry],
        destination: &Path,
        options: &ExtractionOptions,
        ctx: &JobContext,
    ) -> Result<()>;

    /// Adds filesystem paths under an optional destination directory entry.
    async fn add_files(
        &mut self,
        _files: &[Entry],
        _destination: Option<&Entry>,
        _options: &CompressionOptions,
        _ctx: &JobContext,
    ) -> Result<()> {
        Err(Error::Unsupported {
            operation: "add",
            backend: self.name().to_string(),
        })
    }

    /// Removes members, including everything below removed directories.
    async fn delete_files(&mut self, _files: &[Entry], _ctx: &JobContext) -> Result<()> {
        Err(Error::Unsupported {
            operation: "delete",
            backend: self.name().to_string(),
        })
    }

    /// Moves members below (or, for a single member, onto) `destination`.
    async fn move_files(
        &mut self,
        _files: &[Entry],
        _destination: &Entry,
        _options: &CompressionOptions,
        _ctx: &JobContext,
    ) -> Result<()> {
        Err(Error::Unsupported {
            operation: "move",
            backend: self.name().to_string(),
        })
    }
}

/// A cloneable, `'static` handle for reporting from blocking threads.
#[derive(Debug, Clone)]
pub struct EventSink {
    events: mpsc::UnboundedSender<JobEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    /// Reports a discovered entry.
    pub fn entry(&self, entry: Entry) {
        let _ = self.events.send(JobEvent::Entry(entry));
    }

    /// Reports overall progress in `0.0..=1.0`.
    pub fn progress(&self, fraction: f64) {
        let _ = self.events.send(JobEvent::Progress(fraction.clamp(0.0, 1.0)));
    }

    /// Returns `true` once the job was killed.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails with [`Error::Cancelled`] once the job was killed.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Everything a backend needs from the job that drives it.
pub struct JobContext {
    events: mpsc::UnboundedSender<JobEvent>,
    cancel: CancellationToken,
    password_provider: Option<Arc<dyn PasswordProvider>>,
    scratch_dir: PathBuf,
    steps: AtomicUsize,
}

impl JobContext {
    /// Creates a context reporting to `events`.
    pub fn new(
        events: mpsc::UnboundedSender<JobEvent>,
        cancel: CancellationToken,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            events,
            cancel,
            password_provider: None,
            scratch_dir: scratch_dir.into(),
            steps: AtomicUsize::new(0),
        }
    }

    /// Creates a context outside of any job, returning the event receiver.
    ///
    /// Scratch files go to the system temporary directory.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self::new(tx, CancellationToken::new(), std::env::temp_dir()),
            rx,
        )
    }

    /// Sets the provider asked when a password is needed.
    pub fn with_password_provider(mut self, provider: Option<Arc<dyn PasswordProvider>>) -> Self {
        self.password_provider = provider;
        self
    }

    fn send(&self, event: JobEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.events.send(event);
    }

    /// Reports a discovered entry.
    pub fn entry(&self, entry: Entry) {
        self.send(JobEvent::Entry(entry));
    }

    /// Reports that a member was removed.
    pub fn entry_removed(&self, full_path: impl Into<String>) {
        self.send(JobEvent::EntryRemoved(full_path.into()));
    }

    /// Reports overall progress in `0.0..=1.0`.
    pub fn progress(&self, fraction: f64) {
        self.send(JobEvent::Progress(fraction.clamp(0.0, 1.0)));
    }

    /// Reports an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.send(JobEvent::Info(message.into()));
    }

    /// Reports a non-fatal error. The operation still ends with its own result.
    pub fn error(&self, message: impl Into<String>, details: Option<String>) {
        self.send(JobEvent::Error {
            message: message.into(),
            details,
        });
    }

    /// Marks one sub-operation of a multi-signal operation as done.
    pub fn step_finished(&self) {
        let n = self.steps.fetch_add(1, Ordering::SeqCst) + 1;
        self.send(JobEvent::StepFinished(n));
    }

    /// Number of [`step_finished`](Self::step_finished) calls so far.
    pub fn steps_finished(&self) -> usize {
        self.steps.load(Ordering::SeqCst)
    }

    /// The job's cancellation token.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns `true` once the job was killed.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails with [`Error::Cancelled`] once the job was killed.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Directory for job-local scratch files.
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Returns a `'static` reporting handle for blocking threads.
    pub fn sink(&self) -> EventSink {
        EventSink {
            events: self.events.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Suspends the operation until the provider answers.
    ///
    /// Fails with [`Error::PasswordRequired`] (or [`Error::WrongPassword`]
    /// when retrying) if there is no provider or it declines, and with
    /// [`Error::Cancelled`] if the job is killed while waiting.
    pub async fn query_password(&self, archive: &Path, incorrect_try_again: bool) -> Result<Password> {
        let declined = || {
            if incorrect_try_again {
                Error::WrongPassword
            } else {
                Error::PasswordRequired
            }
        };
        let Some(provider) = &self.password_provider else {
            return Err(declined());
        };
        self.send(JobEvent::PasswordRequested {
            incorrect_try_again,
        });
        let query = PasswordQuery::new(archive, incorrect_try_again);
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            answer = provider.get_password(&query) => answer.ok_or_else(declined),
        }
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("scratch_dir", &self.scratch_dir)
            .field("has_password_provider", &self.password_provider.is_some())
            .field("is_cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
