//! The crate-wide error type and its errno conversion.
//!
//! Every in-core failure is raised as an [`FsError`] and travels untouched to
//! the operation boundary, where the embedding bridge converts it into a
//! negative errno with [`reply_code`].

use thiserror::Error;
use tracing::{error, trace};

/// Typed failure for every filesystem operation.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("operation not permitted: {0}")]
    NotPermitted(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("bad file descriptor")]
    BadFileDescriptor,

    #[error("read-only filesystem")]
    ReadOnly,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupted data: {0}")]
    Corrupted(String),

    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl FsError {
    /// The positive errno equivalent of this error.
    ///
    /// `Unexpected` deliberately maps to `EPERM`: anything that escapes the
    /// typed kinds is surfaced as a refusal rather than a fake I/O failure.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound(_) => libc::ENOENT,
            Self::Exists(_) => libc::EEXIST,
            Self::NotADirectory(_) => libc::ENOTDIR,
            Self::NotPermitted(_) | Self::Unexpected(_) => libc::EPERM,
            Self::InvalidArgument(_) => libc::EINVAL,
            Self::BadFileDescriptor => libc::EBADF,
            Self::ReadOnly => libc::EROFS,
            Self::Io(io) => io.raw_os_error().unwrap_or(libc::EIO),
            Self::Corrupted(_) => libc::EIO,
        }
    }

    /// Whether this error is ordinary filesystem business (missing names,
    /// collisions, bad arguments) rather than something worth a log line.
    #[must_use]
    pub fn is_routine(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::Corrupted(_) | Self::Unexpected(_))
    }
}

impl From<FsError> for i32 {
    fn from(err: FsError) -> Self {
        err.errno()
    }
}

/// Convert an operation outcome into the bridge reply convention: zero on
/// success, negative errno on failure.
///
/// Routine errors are traced; `Io`, `Corrupted`, and `Unexpected` are logged
/// at error level since they indicate storage trouble or tampering.
pub fn reply_code<T>(op: &'static str, result: &Result<T, FsError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(err) => {
            if err.is_routine() {
                trace!(op, error = %err, "operation failed");
            } else {
                error!(op, error = %err, "operation failed");
            }
            -err.errno()
        }
    }
}
