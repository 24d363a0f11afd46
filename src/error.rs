//! Error types for archive operations.
//!
//! This module provides the [`Error`] enum which represents all possible
//! failure modes of backends, jobs and the [`Archive`](crate::Archive)
//! facade, along with a convenient [`Result<T>`] type alias.
//!
//! # Error Handling
//!
//! Every job delivers exactly one terminal `Result`. Match on the variants
//! for fine-grained handling:
//!
//! ```rust,no_run
//! use archivist::{Error, Session};
//!
//! # async fn run() -> archivist::Result<()> {
//! let session = Session::new()?;
//! let archive = session.open("photos.tar.gz");
//! match archive.list()?.start().wait().await {
//!     Ok(summary) => println!("{} entries", summary.tree.len()),
//!     Err(Error::WrongPassword) => eprintln!("Incorrect password."),
//!     Err(Error::PasswordRequired) => eprintln!("This archive is encrypted."),
//!     Err(e) => eprintln!("Could not read archive: {e}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The facade itself only carries a coarse [`ArchiveError`](crate::ArchiveError)
//! describing whether a backend could be created at all.

use std::io;
use std::path::PathBuf;

/// The main error type for archive operations.
///
/// # Error Categories
///
/// | Category | Variants | Typical Cause |
/// |----------|----------|---------------|
/// | Backend selection | [`PluginNotFound`][Self::PluginNotFound], [`PluginLoadFailed`][Self::PluginLoadFailed] | Unknown MIME type, missing executables |
/// | Archive state | [`ArchiveCorrupt`][Self::ArchiveCorrupt], [`ReadOnly`][Self::ReadOnly] | Damaged or unwritable archive |
/// | Operation | [`OperationFailed`][Self::OperationFailed], [`EntryNotFound`][Self::EntryNotFound], [`Cancelled`][Self::Cancelled] | Tool failure, bad request, user abort |
/// | Security | [`WrongPassword`][Self::WrongPassword], [`PasswordRequired`][Self::PasswordRequired], [`PathTraversal`][Self::PathTraversal] | Credentials, hostile paths |
/// | I/O | [`Io`][Self::Io] | File system operations |
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred during file or process operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No registered backend declares support for the MIME type.
    #[error("No plugin can handle MIME type '{mime}'")]
    PluginNotFound {
        /// The detected or requested MIME type.
        mime: String,
    },

    /// A backend exists for the MIME type but could not be instantiated.
    ///
    /// The most common cause is a CLI backend whose executables are not
    /// installed.
    #[error("Plugin '{plugin}' failed to load: {reason}")]
    PluginLoadFailed {
        /// The plugin identifier.
        plugin: String,
        /// Why the plugin could not be used.
        reason: String,
    },

    /// The backend detected a structural problem in the archive.
    ///
    /// Backends normally degrade a corrupt archive to read-only and keep
    /// listing. This error is returned when nothing useful could be read.
    #[error("Archive is corrupt: {reason}")]
    ArchiveCorrupt {
        /// A description of the corruption.
        reason: String,
    },

    /// A list, add, delete, extract or move operation failed mid-way.
    ///
    /// `details` carries the raw diagnostic output of the backend when there
    /// is any (e.g. the last lines a CLI tool printed on stderr).
    #[error("{message}")]
    OperationFailed {
        /// Human-readable summary.
        message: String,
        /// Optional detail text.
        details: Option<String>,
    },

    /// The supplied password is wrong.
    ///
    /// **Note:** if no password was supplied at all,
    /// [`Error::PasswordRequired`] is returned instead.
    #[error("Wrong password")]
    WrongPassword,

    /// The archive is encrypted and no password was provided.
    #[error("password required for encrypted archive")]
    PasswordRequired,

    /// An extraction target would escape the destination directory.
    ///
    /// This is a **security error**: the archive contains a member such as
    /// `../../etc/passwd`.
    #[error("Path traversal detected: {path}")]
    PathTraversal {
        /// The offending archive path.
        path: String,
    },

    /// A delete or move referenced an entry that is not in the archive.
    ///
    /// The archive is left unchanged.
    #[error("Entry not found in archive: {path}")]
    EntryNotFound {
        /// The missing full path.
        path: String,
    },

    /// A mutating operation was requested on a read-only archive.
    #[error("Archive is read-only: {}", path.display())]
    ReadOnly {
        /// The archive file.
        path: PathBuf,
    },

    /// The backend does not implement the requested operation.
    #[error("Operation '{operation}' is not supported by {backend}")]
    Unsupported {
        /// The operation name.
        operation: &'static str,
        /// The backend name.
        backend: String,
    },

    /// An entry or option value is malformed.
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// The job was killed.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Creates an [`Error::OperationFailed`] without detail text.
    pub fn failed(message: impl Into<String>) -> Self {
        Error::OperationFailed {
            message: message.into(),
            details: None,
        }
    }

    /// Creates an [`Error::OperationFailed`] with detail text.
    pub fn failed_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Error::OperationFailed {
            message: message.into(),
            details: Some(details.into()),
        }
    }

    /// Returns the detail text attached to this error, if any.
    pub fn details(&self) -> Option<&str> {
        match self {
            Error::OperationFailed { details, .. } => details.as_deref(),
            _ => None,
        }
    }

    /// Returns `true` if this error indicates a security issue.
    pub fn is_security_error(&self) -> bool {
        matches!(self, Error::PathTraversal { .. })
    }

    /// Returns `true` if this is a password-related error.
    pub fn is_password_error(&self) -> bool {
        matches!(self, Error::WrongPassword | Error::PasswordRequired)
    }

    /// Returns `true` if the job was killed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns `true` if this error might be recoverable.
    ///
    /// - `WrongPassword` / `PasswordRequired`: retry with a password
    /// - `Cancelled`: the operation can be restarted
    /// - `Io` (transient kinds only)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::WrongPassword | Error::PasswordRequired | Error::Cancelled => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Returns `true` if the error comes from backend selection.
    pub fn is_plugin_error(&self) -> bool {
        matches!(
            self,
            Error::PluginNotFound { .. } | Error::PluginLoadFailed { .. }
        )
    }
}

/// A specialized Result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;
