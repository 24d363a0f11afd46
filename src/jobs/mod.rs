//! Asynchronous jobs wrapping one backend operation each.
//!
//! A job is configured with a builder, started explicitly, and then observed
//! through its [`JobHandle`]:
//!
//! - a stream of [`JobEvent`]s (entries, progress, diagnostics) that always
//!   ends with exactly one [`JobEvent::Finished`],
//! - a [`JobState`] that moves from `Created` to `Running` to `Finished`,
//! - the terminal `Result`, available through [`JobHandle::wait`].
//!
//! Killing a job cancels its token; the running backend future is dropped
//! (child processes are killed on drop) and the job still finishes, with
//! [`Error::Cancelled`].
//!
//! Jobs lock the backend for their whole duration, so jobs against the same
//! archive run one after another.
//!
//! # Example
//!
//! ```rust,no_run
//! use archivist::jobs::{JobEvent, ListJob};
//! # async fn run(iface: archivist::SharedInterface) -> archivist::Result<()> {
//! let mut handle = ListJob::new(iface).start();
//! while let Some(event) = handle.next_event().await {
//!     if let JobEvent::Entry(entry) = event {
//!         println!("{}", entry.full_path());
//!     }
//! }
//! let summary = handle.wait().await?;
//! println!("single folder: {}", summary.is_single_folder_archive);
//! # Ok(())
//! # }
//! ```

mod edit;
mod extract;
mod list;

pub use edit::{AddJob, DeleteJob, MoveJob};
pub use extract::{ExtractJob, PreviewFile, PreviewJob};
pub use list::{ListStats, ListSummary, ListJob};

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::entry::Entry;
use crate::interface::{JobContext, SharedInterface};
use crate::password::PasswordProvider;
use crate::{Error, Result};

/// Something that happened while a job ran.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// The job began executing.
    Started,
    /// The backend discovered an archive member.
    Entry(Entry),
    /// A member was removed from the archive.
    EntryRemoved(String),
    /// Overall progress in `0.0..=1.0`.
    Progress(f64),
    /// Informational message.
    Info(String),
    /// Non-fatal diagnostic. The terminal result is reported separately.
    Error {
        /// Human-readable message.
        message: String,
        /// Optional detail text.
        details: Option<String>,
    },
    /// The job is waiting for a password.
    PasswordRequested {
        /// A previous password was rejected.
        incorrect_try_again: bool,
    },
    /// One sub-operation of a multi-signal operation completed.
    StepFinished(usize),
    /// The job ended. Always the last event.
    Finished {
        /// Whether the job succeeded.
        success: bool,
        /// The error message on failure.
        error: Option<String>,
    },
}

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Started but not yet executing.
    Created,
    /// Executing.
    Running,
    /// Done.
    Finished {
        /// Whether the job succeeded.
        success: bool,
    },
}

/// The operation a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Listing.
    List,
    /// Extraction to a destination.
    Extract,
    /// Extraction of one entry to a scratch directory.
    Preview,
    /// Adding files.
    Add,
    /// Deleting members.
    Delete,
    /// Moving members.
    Move,
}

/// Callback run with the terminal result, before the `Finished` event.
pub(crate) type FinishHook<T> = Box<dyn FnOnce(&Result<T>) + Send>;

/// Settings every job shares.
#[derive(Clone)]
pub(crate) struct JobConfig {
    pub(crate) interface: SharedInterface,
    pub(crate) cancel: CancellationToken,
    pub(crate) password_provider: Option<Arc<dyn PasswordProvider>>,
    pub(crate) scratch_dir: PathBuf,
}

impl JobConfig {
    pub(crate) fn new(interface: SharedInterface) -> Self {
        Self {
            interface,
            cancel: CancellationToken::new(),
            password_provider: None,
            scratch_dir: std::env::temp_dir(),
        }
    }
}

/// Generates the builder methods every job exposes.
macro_rules! job_settings {
    ($job:ty) => {
        impl $job {
            /// Uses `token` to kill the job.
            pub fn cancel_token(mut self, token: tokio_util::sync::CancellationToken) -> Self {
                self.config.cancel = token;
                self
            }

            /// Sets the provider asked when the archive needs a password.
            pub fn password_provider(
                mut self,
                provider: std::sync::Arc<dyn crate::password::PasswordProvider>,
            ) -> Self {
                self.config.password_provider = Some(provider);
                self
            }

            /// Sets the directory for job-local scratch files.
            pub fn scratch_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
                self.config.scratch_dir = dir.into();
                self
            }

            /// Applies the settings of the facade that created the job.
            pub(crate) fn configured(
                mut self,
                scratch_dir: std::path::PathBuf,
                provider: Option<std::sync::Arc<dyn crate::password::PasswordProvider>>,
            ) -> Self {
                self.config.scratch_dir = scratch_dir;
                if provider.is_some() {
                    self.config.password_provider = provider;
                }
                self
            }
        }
    };
}
pub(crate) use job_settings;

/// Handle to a started job.
pub struct JobHandle<T> {
    kind: JobKind,
    events: mpsc::UnboundedReceiver<JobEvent>,
    state: watch::Receiver<JobState>,
    cancel: CancellationToken,
    task: JoinHandle<Result<T>>,
}

impl<T> JobHandle<T> {
    /// The operation this job performs.
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// The current state.
    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Waits for the next event. Returns `None` after `Finished`.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Returns the next event if one is queued.
    pub fn try_next_event(&mut self) -> Option<JobEvent> {
        self.events.try_recv().ok()
    }

    /// Requests termination. Returns `true`: kill is always accepted.
    pub fn kill(&self) -> bool {
        self.cancel.cancel();
        true
    }

    /// Backends cannot pause; always returns `false`.
    pub fn suspend(&self) -> bool {
        false
    }

    /// Backends cannot pause; always returns `false`.
    pub fn resume(&self) -> bool {
        false
    }

    /// Returns a token that kills the job when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for the terminal result.
    pub async fn wait(self) -> Result<T> {
        join_result(self.task.await)
    }

    /// Waits for the terminal result, collecting every event.
    pub async fn wait_with_events(mut self) -> (Vec<JobEvent>, Result<T>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        (events, join_result(self.task.await))
    }
}

impl<T> std::fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn join_result<T>(joined: std::result::Result<Result<T>, tokio::task::JoinError>) -> Result<T> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(Error::Cancelled),
        Err(e) => Err(Error::failed_with_details("Job terminated abnormally", e.to_string())),
    }
}

/// Execution environment handed to a job body.
pub(crate) struct JobRunner {
    kind: JobKind,
    config: JobConfig,
    outer: mpsc::UnboundedSender<JobEvent>,
}

impl JobRunner {
    pub(crate) fn interface(&self) -> &SharedInterface {
        &self.config.interface
    }

    pub(crate) fn scratch_dir(&self) -> &std::path::Path {
        &self.config.scratch_dir
    }

    /// Sends an event straight to the handle.
    pub(crate) fn emit(&self, event: JobEvent) {
        let _ = self.outer.send(event);
    }

    /// Runs one backend step.
    ///
    /// `work` receives a fresh [`JobContext`]; every event it reports is
    /// shown to `observe` and forwarded to the handle. The step ends when
    /// `work` returns and all its events have been forwarded, or when the job
    /// is killed.
    pub(crate) async fn run<R, F, Fut>(&self, work: F, mut observe: impl FnMut(&JobEvent)) -> Result<R>
    where
        F: FnOnce(JobContext) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = JobContext::new(tx, self.config.cancel.clone(), self.config.scratch_dir.clone())
            .with_password_provider(self.config.password_provider.clone());
        let cancel = self.config.cancel.clone();
        let work = work(ctx);

        let guarded = async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                result = work => result,
            }
        };
        let forward = async {
            while let Some(event) = rx.recv().await {
                observe(&event);
                let _ = self.outer.send(event);
            }
        };
        let (result, ()) = tokio::join!(guarded, forward);
        log::debug!("{:?} step finished: ok={}", self.kind, result.is_ok());
        result
    }
}

/// Spawns a job body and returns its handle.
pub(crate) fn launch<T, F, Fut>(
    kind: JobKind,
    config: JobConfig,
    hook: Option<FinishHook<T>>,
    body: F,
) -> JobHandle<T>
where
    T: Send + 'static,
    F: FnOnce(JobRunner) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let (outer, events) = mpsc::unbounded_channel();
    let (state_tx, state) = watch::channel(JobState::Created);
    let cancel = config.cancel.clone();
    let runner = JobRunner {
        kind,
        config,
        outer: outer.clone(),
    };

    let task = tokio::spawn(async move {
        let _ = state_tx.send(JobState::Running);
        let _ = outer.send(JobEvent::Started);
        log::debug!("{kind:?} job started");

        let result = join_result(tokio::spawn(body(runner)).await);

        if let Some(hook) = hook {
            hook(&result);
        }
        let success = result.is_ok();
        if let Err(e) = &result {
            log::debug!("{kind:?} job failed: {e}");
        }
        let _ = outer.send(JobEvent::Finished {
            success,
            error: result.as_ref().err().map(ToString::to_string),
        });
        let _ = state_tx.send(JobState::Finished { success });
        result
    });

    JobHandle {
        kind,
        events,
        state,
        cancel,
        task,
    }
}
