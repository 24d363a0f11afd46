//! Exit codes for the CLI tool.

use archivist::Error;

/// Exit code constants
pub const SUCCESS: i32 = 0;
/// Operation completed with warnings
pub const WARNING: i32 = 1;
/// Fatal error occurred
pub const FATAL_ERROR: i32 = 2;
/// Archive damaged or of an unsupported type
pub const BAD_ARCHIVE: i32 = 3;
/// Wrong or missing password
pub const WRONG_PASSWORD: i32 = 4;
/// I/O error
pub const IO_ERROR: i32 = 5;
/// Archive cannot be modified
pub const READ_ONLY: i32 = 6;
/// Ctrl+C (128 + SIGINT)
pub const USER_INTERRUPT: i32 = 130;
/// Invalid command line arguments
pub const BAD_ARGS: i32 = 255;

/// Exit code enum for structured handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    Warning,
    FatalError,
    BadArchive,
    WrongPassword,
    IoError,
    ReadOnly,
    UserInterrupt,
    BadArgs,
}

impl ExitCode {
    /// Returns the numeric exit code
    pub fn code(self) -> i32 {
        match self {
            Self::Success => SUCCESS,
            Self::Warning => WARNING,
            Self::FatalError => FATAL_ERROR,
            Self::BadArchive => BAD_ARCHIVE,
            Self::WrongPassword => WRONG_PASSWORD,
            Self::IoError => IO_ERROR,
            Self::ReadOnly => READ_ONLY,
            Self::UserInterrupt => USER_INTERRUPT,
            Self::BadArgs => BAD_ARGS,
        }
    }
}

/// Converts an archivist error to an exit code
pub fn error_to_exit_code(error: &Error) -> ExitCode {
    match error {
        Error::Io(_) => ExitCode::IoError,
        Error::PluginNotFound { .. } | Error::PluginLoadFailed { .. } => ExitCode::BadArchive,
        Error::ArchiveCorrupt { .. } => ExitCode::BadArchive,
        Error::WrongPassword | Error::PasswordRequired => ExitCode::WrongPassword,
        Error::PathTraversal { .. } => ExitCode::FatalError,
        Error::EntryNotFound { .. } | Error::InvalidEntry(_) => ExitCode::BadArgs,
        Error::ReadOnly { .. } | Error::Unsupported { .. } => ExitCode::ReadOnly,
        Error::Cancelled => ExitCode::UserInterrupt,
        Error::OperationFailed { .. } => ExitCode::FatalError,
        // Future error variants - required by #[non_exhaustive]
        _ => ExitCode::FatalError,
    }
}
