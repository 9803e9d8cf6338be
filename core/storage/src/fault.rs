//! Raw backend faults and their translation into canonical errors.

use thiserror::Error;

use cloudfs_common::{Error, ErrorKind};

use crate::drive::DriveFault;
use crate::native::NativeFault;

/// Fault raised by a backend, before translation.
///
/// Each variant's own mapping decides the canonical kind.
#[derive(Debug, Error)]
pub enum BackendFault {
    /// Raised by the synced-container backend.
    #[error(transparent)]
    Native(#[from] NativeFault),

    /// Raised by the remote drive backend.
    #[error(transparent)]
    Drive(#[from] DriveFault),

    /// A child name produced by a listing failed path validation.
    #[error(transparent)]
    Path(#[from] Error),
}

/// Result type for raw backend calls.
pub type FaultResult<T> = std::result::Result<T, BackendFault>;

impl BackendFault {
    /// Canonical kind this fault translates to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendFault::Native(fault) => fault.canonical_kind(),
            BackendFault::Drive(fault) => fault.canonical_kind(),
            BackendFault::Path(err) => err.kind(),
        }
    }
}

impl From<BackendFault> for Error {
    fn from(fault: BackendFault) -> Self {
        match fault {
            BackendFault::Path(err) => err,
            other => Error::new(other.kind(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_keeps_raw_message() {
        let fault = BackendFault::from(DriveFault::Status {
            status: 404,
            reason: Some("notFound".to_string()),
            message: "File not found: 1AbC".to_string(),
        });
        let err = Error::from(fault);
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
        assert!(err.message().contains("1AbC"));
    }

    #[test]
    fn test_unmapped_fault_is_unknown() {
        let fault = BackendFault::from(DriveFault::Status {
            status: 418,
            reason: None,
            message: "teapot".to_string(),
        });
        assert_eq!(Error::from(fault).kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_path_error_passes_through() {
        let fault = BackendFault::from(Error::InvalidPath("a\\b".to_string()));
        assert_eq!(Error::from(fault), Error::InvalidPath("a\\b".to_string()));
    }
}
