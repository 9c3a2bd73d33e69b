//! Uploader capability consumed by the batch runners.
//!
//! The wire protocol lives behind [`Uploader`]. A runner builds one uploader
//! per task through an [`UploaderFactory`], calls `start()` and then waits for
//! the uploader to report through its [`UploadEvents`] handle. Cancellation
//! calls `abort()` and treats its completion as the acknowledgement.

mod local;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::UploadError;
use crate::retry::{self, RetrySchedule};
use crate::task::{BatchId, TaskId, UploadSource, UploadTask};
use crate::token::CancelSignal;

pub use local::{LocalDirUploader, LocalDirUploaderFactory, DEFAULT_CHUNK_SIZE};

/// Options handed to an uploader for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOptions {
    pub endpoint: String,
    /// `endpoint + resume_token` when continuing an earlier upload.
    pub upload_url: Option<String>,
    pub retry_delays: RetrySchedule,
    pub metadata: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
}

impl UploadOptions {
    pub fn for_task(task: &UploadTask, endpoint: &str, retry_delays: &RetrySchedule) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            upload_url: task
                .resume_token
                .as_ref()
                .map(|token| format!("{}{}", endpoint, token)),
            retry_delays: retry_delays.clone(),
            metadata: task.metadata.clone(),
            headers: task.headers.clone(),
        }
    }
}

/// Everything an uploader needs to transfer one task.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub batch_id: BatchId,
    pub task_id: TaskId,
    pub source: UploadSource,
    pub options: UploadOptions,
}

/// Event reported by an uploader to its runner.
#[derive(Debug, Clone)]
pub(crate) enum UploadEvent {
    Progress { bytes_done: u64, bytes_total: u64 },
    Success,
    Error(UploadError),
}

/// Upload event tagged with the token serial of the occupancy it belongs to.
#[derive(Debug)]
pub(crate) struct TaggedEvent {
    pub(crate) serial: u64,
    pub(crate) event: UploadEvent,
}

/// Callback bindings for one upload. Cheap to clone; every clone reports to
/// the same runner. Reports after the runner stopped listening are dropped.
#[derive(Debug, Clone)]
pub struct UploadEvents {
    serial: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
    cancel: CancelSignal,
    retry_delays: RetrySchedule,
}

impl UploadEvents {
    pub(crate) fn new(
        serial: u64,
        tx: mpsc::UnboundedSender<TaggedEvent>,
        cancel: CancelSignal,
        retry_delays: RetrySchedule,
    ) -> Self {
        Self {
            serial,
            tx,
            cancel,
            retry_delays,
        }
    }

    fn send(&self, event: UploadEvent) {
        let _ = self.tx.send(TaggedEvent {
            serial: self.serial,
            event,
        });
    }

    pub fn progress(&self, bytes_done: u64, bytes_total: u64) {
        self.send(UploadEvent::Progress {
            bytes_done,
            bytes_total,
        });
    }

    pub fn success(&self) {
        self.send(UploadEvent::Success);
    }

    pub fn error(&self, error: UploadError) {
        self.send(UploadEvent::Error(error));
    }

    /// Retry-decision hook: false exactly when the server rejected the
    /// request permanently. Timing comes from [`retry_delay`](Self::retry_delay).
    pub fn should_retry(&self, error: &UploadError, attempt: u32, options: &UploadOptions) -> bool {
        let retry = retry::should_retry(error, attempt);
        tracing::debug!(
            attempt,
            retry,
            endpoint = %options.endpoint,
            resumed = options.upload_url.is_some(),
            "upload attempt failed: {}",
            error
        );
        retry
    }

    /// Delay before attempt `attempt + 1`; `None` once the schedule is used up.
    pub fn retry_delay(&self, attempt: u32) -> Option<Duration> {
        self.retry_delays.delay_for(attempt)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancel_requested()
    }

    /// Resolves once cancellation of this task was requested.
    pub async fn cancelled(&self) {
        self.cancel.clone().cancelled().await;
    }

    /// Read-only view of the task's cancellation token.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }
}

/// One in-flight transfer.
#[async_trait]
pub trait Uploader: Send {
    /// Begin transferring. Must not block; progress and the terminal outcome
    /// are reported through `UploadEvents`.
    fn start(&mut self);

    /// Stop the transfer and release its resources. Resolves once cleanup
    /// (flush, connection close) is complete. `terminate` also discards any
    /// partial upload on the remote side.
    async fn abort(&mut self, terminate: bool) -> Result<(), UploadError>;
}

/// Builds an uploader per task.
pub trait UploaderFactory: Send + Sync {
    fn create(
        &self,
        request: UploadRequest,
        events: UploadEvents,
    ) -> Result<Box<dyn Uploader>, UploadError>;
}

impl<F> UploaderFactory for F
where
    F: Fn(UploadRequest, UploadEvents) -> Result<Box<dyn Uploader>, UploadError> + Send + Sync,
{
    fn create(
        &self,
        request: UploadRequest,
        events: UploadEvents,
    ) -> Result<Box<dyn Uploader>, UploadError> {
        self(request, events)
    }
}
