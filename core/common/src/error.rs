//! Canonical error taxonomy for CloudFS.
//!
//! Every backend fault is translated into one of these kinds before it
//! leaves the facade. The message carries the backend's raw text for
//! diagnostics only; callers branch on [`Error::kind`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Provider-independent failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The path (or the parent it requires) does not exist.
    FileNotFound,
    /// Unlink of a directory that still has children.
    DirectoryNotEmpty,
    /// A file occupies a key where a directory was requested.
    AlreadyExists,
    /// Missing, empty or rejected credential.
    Unauthorized,
    /// Backend unreachable or disabled.
    Unavailable,
    /// The raw path failed normalization.
    InvalidPath,
    /// Anything the backend mapping did not recognize.
    Unknown,
}

impl ErrorKind {
    /// Stable string code, e.g. for CLI output or FFI.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::FileNotFound => "ERR_FILE_NOT_FOUND",
            ErrorKind::DirectoryNotEmpty => "ERR_DIRECTORY_NOT_EMPTY",
            ErrorKind::AlreadyExists => "ERR_FILE_EXISTS",
            ErrorKind::Unauthorized => "ERR_AUTHENTICATION_FAILED",
            ErrorKind::Unavailable => "ERR_STORAGE_UNAVAILABLE",
            ErrorKind::InvalidPath => "ERR_PATH_INVALID",
            ErrorKind::Unknown => "ERR_UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error record returned by every CloudFS operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Resource not found.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Directory still has children.
    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Resource already exists with a conflicting kind.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Credential missing or rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Backend cannot be reached.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Path failed validation.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Unmapped backend fault.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl Error {
    /// Build an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::FileNotFound => Error::FileNotFound(message),
            ErrorKind::DirectoryNotEmpty => Error::DirectoryNotEmpty(message),
            ErrorKind::AlreadyExists => Error::AlreadyExists(message),
            ErrorKind::Unauthorized => Error::Unauthorized(message),
            ErrorKind::Unavailable => Error::Unavailable(message),
            ErrorKind::InvalidPath => Error::InvalidPath(message),
            ErrorKind::Unknown => Error::Unknown(message),
        }
    }

    /// The canonical kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::FileNotFound(_) => ErrorKind::FileNotFound,
            Error::DirectoryNotEmpty(_) => ErrorKind::DirectoryNotEmpty,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Unavailable(_) => ErrorKind::Unavailable,
            Error::InvalidPath(_) => ErrorKind::InvalidPath,
            Error::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// The raw diagnostic message from the originating backend.
    pub fn message(&self) -> &str {
        match self {
            Error::FileNotFound(m)
            | Error::DirectoryNotEmpty(m)
            | Error::AlreadyExists(m)
            | Error::Unauthorized(m)
            | Error::Unavailable(m)
            | Error::InvalidPath(m)
            | Error::Unknown(m) => m,
        }
    }

    /// Shorthand for `self.kind() == ErrorKind::FileNotFound`.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::FileNotFound
    }
}

/// Result type alias using the canonical Error.
pub type Result<T> = std::result::Result<T, Error>;
