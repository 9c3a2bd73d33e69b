//! Callback sink implemented by the embedding application.
//!
//! The scheduler invokes these from its runner tasks; implementations must be
//! cheap and must not block.

use crate::error::TaskError;
use crate::task::{BatchId, TaskId};

pub trait UploadCallbacks: Send + Sync {
    /// Tasks accepted and waiting for a slot. Fired once per submission, in
    /// submission order, before any admission decision.
    fn on_hold(&self, batch: BatchId, task_ids: &[TaskId]);

    fn on_start(&self, batch: BatchId, task: TaskId);

    /// `percent` is rounded to two decimals.
    fn on_progress(&self, batch: BatchId, task: TaskId, bytes_done: u64, bytes_total: u64, percent: f64);

    fn on_success(&self, batch: BatchId, task: TaskId);

    fn on_error(&self, batch: BatchId, task: TaskId, error: &TaskError);
}
