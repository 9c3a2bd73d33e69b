//! Progress reporting for uploads (bytes done, percent).
//!
//! Uploaders report raw byte counts; the runner turns them into a
//! `ProgressStats` snapshot before forwarding to the callback sink.

/// Snapshot of upload progress for one task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressStats {
    /// Bytes accepted by the server so far.
    pub bytes_done: u64,
    /// Total size of the payload in bytes.
    pub total_bytes: u64,
}

impl ProgressStats {
    pub fn new(bytes_done: u64, total_bytes: u64) -> Self {
        Self {
            bytes_done,
            total_bytes,
        }
    }

    /// Fraction complete in [0.0, 1.0]. An empty payload counts as complete.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        (self.bytes_done as f64 / self.total_bytes as f64).min(1.0)
    }

    /// Percent complete rounded to two decimals (e.g. 33.33).
    pub fn percent(&self) -> f64 {
        (self.fraction() * 100.0 * 100.0).round() / 100.0
    }
}
