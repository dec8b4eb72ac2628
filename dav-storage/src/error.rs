use dav_core::{DavError, ErrorClass};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("webdav error: {0}")]
    Dav(#[from] DavError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("remote object not found: {0}")]
    NotFound(String),
    #[error("remote object already exists: {0}")]
    AlreadyExists(String),
    #[error("unexpected status {status} for {path}")]
    UnexpectedStatus {
        path: String,
        status: dav_core::StatusCode,
    },
}

/// Coarse cause of a failed operation, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Transport,
    Unsupported,
    Conflict,
    Local,
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Dav(err) => match err.classification() {
                ErrorClass::NotFound => ErrorKind::NotFound,
                ErrorClass::Unsupported => ErrorKind::Unsupported,
                _ => ErrorKind::Transport,
            },
            StorageError::Io(_) => ErrorKind::Local,
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::AlreadyExists(_) => ErrorKind::Conflict,
            StorageError::UnexpectedStatus { .. } => ErrorKind::Transport,
        }
    }

    /// Logs the failure of `operation` on the side channel; absence is expected and stays quiet.
    pub(crate) fn log(&self, operation: &str, path: &str) {
        match self.kind() {
            ErrorKind::NotFound => {
                tracing::debug!(operation, path, error = %self, "remote object absent")
            }
            ErrorKind::Unsupported => {
                tracing::warn!(operation, path, error = %self, "operation unsupported by server")
            }
            _ => tracing::warn!(operation, path, error = %self, "webdav operation failed"),
        }
    }
}
