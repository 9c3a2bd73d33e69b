//! Error types surfaced by the scheduler and reported to the callback sink.

use std::io;
use std::sync::Arc;

use crate::task::TaskId;

/// Error reported by an uploader for a single transfer attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UploadError {
    /// Server answered with a non-success status.
    #[error("HTTP {status}")]
    Http { status: u16 },
    /// Network-level failure (connection reset, DNS, timeout).
    #[error("connection: {0}")]
    Connection(String),
    /// Local read or write failed.
    #[error("io: {0}")]
    Io(Arc<io::Error>),
    #[error("{0}")]
    Other(String),
}

impl UploadError {
    /// Server denied the request and retrying cannot help (403, or a
    /// permission error for local destinations).
    pub fn is_permanent_rejection(&self) -> bool {
        crate::retry::classify(self) == crate::retry::ErrorKind::PermanentRejection
    }
}

impl From<io::Error> for UploadError {
    fn from(e: io::Error) -> Self {
        UploadError::Io(Arc::new(e))
    }
}

/// Error delivered to `on_error` for one task. Never halts the batch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// The transfer itself failed after the uploader gave up retrying.
    #[error("upload failed: {0}")]
    Transport(#[from] UploadError),
    /// Task id already pending or active in this batch.
    #[error("task {task} is already queued in this batch")]
    Duplicate { task: TaskId },
    /// The uploader factory could not build an uploader for the task.
    #[error("uploader setup failed: {0}")]
    Setup(String),
    /// The batch runner could not be created (e.g. no async runtime).
    #[error("batch runner unavailable: {0}")]
    RunnerUnavailable(String),
}

/// Error returned from scheduler operations themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("upload scheduler has no callback sink bound")]
    CallbacksNotBound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_403_is_permanent() {
        assert!(UploadError::Http { status: 403 }.is_permanent_rejection());
        assert!(!UploadError::Http { status: 404 }.is_permanent_rejection());
        assert!(!UploadError::Http { status: 503 }.is_permanent_rejection());
        assert!(!UploadError::Connection("reset".into()).is_permanent_rejection());
    }

    #[test]
    fn task_error_wraps_upload_error() {
        let e: TaskError = UploadError::Http { status: 500 }.into();
        assert_eq!(e.to_string(), "upload failed: HTTP 500");
    }
}
