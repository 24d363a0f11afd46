//! # archivist
//!
//! The core of an archive manager: one asynchronous job API over pluggable
//! archive backends.
//!
//! The crate models an archive as a tree of [`Entry`] values and drives
//! every operation (list, extract, add, delete, move) through a job that
//! reports progress as a stream of events and ends with exactly one result.
//! Backends adapt concrete technologies to the [`ArchiveInterface`] trait:
//!
//! | Backend | Formats | Access |
//! |---------|---------|--------|
//! | `tar` (native) | tar, tar.gz, tar.bz2, tar.xz | read-write |
//! | `cli7z` (`7z`) | 7z, zip, tar family | read-write |
//! | `clirar` (`unrar`, `rar`) | rar | read-write with `rar`, read-only otherwise |
//! | `cliunarchiver` (`lsar`, `unar`) | rar, 7z, zip, cpio | read-only |
//! | `singlefile` (native) | gz, bz2, xz, svgz | read-only |
//!
//! ## Quick Start
//!
//! ### Listing an Archive
//!
//! ```rust,no_run
//! use archivist::{JobEvent, Session};
//!
//! # async fn run() -> archivist::Result<()> {
//! let session = Session::new()?;
//! let archive = session.open("backup.tar.gz");
//!
//! let mut job = archive.list()?.start();
//! while let Some(event) = job.next_event().await {
//!     if let JobEvent::Entry(entry) = event {
//!         println!("{} ({} bytes)", entry.full_path(), entry.size);
//!     }
//! }
//! let summary = job.wait().await?;
//! println!("{} files, {} bytes unpacked", summary.number_of_files, summary.extracted_files_size);
//! # Ok(())
//! # }
//! ```
//!
//! ### Extracting with Preserved Paths
//!
//! ```rust,no_run
//! use archivist::{ExtractionOptions, Session};
//!
//! # async fn run() -> archivist::Result<()> {
//! let session = Session::new()?;
//! let archive = session.open("photos.rar");
//! let options = ExtractionOptions::new().preserve_paths(true);
//! archive.copy_files(Vec::new(), "./photos", options).await?.start().wait().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Encrypted Archives
//!
//! A job that meets an encrypted archive suspends until its
//! [`PasswordProvider`] answers. A rejected password is asked for again;
//! declining ends the job with [`Error::WrongPassword`] or
//! [`Error::PasswordRequired`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use archivist::{Session, StaticPassword};
//!
//! # async fn run() -> archivist::Result<()> {
//! let session = Session::new()?;
//! let mut archive = session.open("secret.7z");
//! archive.set_password_provider(Arc::new(StaticPassword::new("hunter2")));
//! println!("{:?}", archive.encryption_type().await?);
//! # Ok(())
//! # }
//! ```
//!
//! ### Creating an Archive
//!
//! ```rust,no_run
//! use archivist::{CompressionOptions, Entry, Session};
//!
//! # async fn run() -> archivist::Result<()> {
//! let session = Session::new()?;
//! let archive = session.open("new.tar.xz");
//! let files = vec![Entry::new("src/main.rs"), Entry::directory("docs/")];
//! let options = CompressionOptions::new().global_work_dir("/home/me/project");
//! archive.add_files(files, None, options)?.start().wait().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `gzip` | Yes | gzip support in the native backends |
//! | `bzip2` | Yes | bzip2 support in the native backends |
//! | `xz` | Yes | xz support in the native backends |
//! | `cli` | No | The `archivist` command-line tool |
//!
//! ## Safety
//!
//! Extraction validates every member path against the destination
//! directory ([`PathSafety`]). Members such as `../../etc/passwd` are
//! rejected by default, and symbolic links may not point outside the
//! extraction root.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod archive;
pub mod backend;
pub mod batch;
pub mod entry;
pub mod error;
pub mod interface;
pub mod jobs;
pub mod options;
pub mod password;
pub mod paths;
pub mod plugin;
pub mod safety;
pub mod session;

pub use archive::{Archive, ArchiveError, EncryptionType};
pub use batch::AddToArchive;
pub use entry::{Entry, EntryId, EntryTree};
pub use error::{Error, Result};
pub use interface::{ArchiveInterface, Capabilities, InterfaceState, JobContext, SharedInterface};
pub use jobs::{
    AddJob, DeleteJob, ExtractJob, JobEvent, JobHandle, JobKind, JobState, ListJob, ListSummary,
    MoveJob, PreviewFile, PreviewJob,
};
pub use options::{CompressionOptions, ExtractionOptions};
pub use password::{
    CallbackPasswordProvider, InteractivePasswordProvider, Password, PasswordProvider,
    PasswordQuery, PasswordRequest, StaticPassword,
};
pub use plugin::{Plugin, PluginMetadata, PluginRegistry, detect_mime_type};
pub use safety::{PathSafety, validate_extract_path};
pub use session::{Session, SessionConfig};

// Re-export CancellationToken for convenience
pub use tokio_util::sync::CancellationToken;
