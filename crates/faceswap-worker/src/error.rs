//! Worker error types.

use std::path::PathBuf;

use faceswap_models::{FileRef, MediaKind, RequestError};
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("Uploaded {0} not found")]
    UploadNotFound(FileRef),

    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("Video duration {actual}s cannot be longer than {max}s")]
    DurationExceeded { actual: u64, max: u64 },

    #[error("Target is not a valid {expected} file")]
    MediaKindMismatch { expected: MediaKind },

    #[error("Staged file missing or empty: {0}")]
    MissingStagedFile(PathBuf),

    #[error("Media error: {0}")]
    Media(#[from] faceswap_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// True if the caller sent something unusable, as opposed to a tool or
    /// environment failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            WorkerError::InvalidRequest(_)
                | WorkerError::UploadNotFound(_)
                | WorkerError::InvalidUrl(_)
                | WorkerError::DurationExceeded { .. }
                | WorkerError::MediaKindMismatch { .. }
        )
    }
}
