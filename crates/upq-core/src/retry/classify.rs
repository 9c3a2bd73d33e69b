//! Classify upload errors into retry policy error kinds.

use std::io;

use crate::error::UploadError;
use crate::retry::policy::ErrorKind;

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u16) -> ErrorKind {
    match code {
        403 => ErrorKind::PermanentRejection,
        408 => ErrorKind::Timeout,
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code),
        _ => ErrorKind::Other,
    }
}

/// Classify a local IO error for retry decisions.
pub fn classify_io_error(e: &io::Error) -> ErrorKind {
    match e.kind() {
        io::ErrorKind::TimedOut => ErrorKind::Timeout,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::Interrupted => ErrorKind::Connection,
        io::ErrorKind::PermissionDenied => ErrorKind::PermanentRejection,
        _ => ErrorKind::Other,
    }
}

pub fn classify(e: &UploadError) -> ErrorKind {
    match e {
        UploadError::Http { status } => classify_http_status(*status),
        UploadError::Connection(_) => ErrorKind::Connection,
        UploadError::Io(io) => classify_io_error(io),
        UploadError::Other(_) => ErrorKind::Other,
    }
}

/// Retry-decision hook: false exactly when the server denied the request
/// permanently. Timing is left to the delay schedule.
pub fn should_retry(e: &UploadError, _attempt: u32) -> bool {
    classify(e) != ErrorKind::PermanentRejection
}
