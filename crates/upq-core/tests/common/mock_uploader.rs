//! Scriptable uploader for scheduler tests.
//!
//! In auto mode each upload reports progress and finishes after a fixed
//! delay. In manual mode nothing happens until the test drives the upload
//! through its [`MockUpload`] handle.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use upq_core::error::UploadError;
use upq_core::task::{BatchId, TaskId};
use upq_core::uploader::{UploadEvents, UploadRequest, Uploader, UploaderFactory};

/// Metadata key: the upload fails with the given HTTP status.
pub const FAIL_STATUS: &str = "fail-status";
/// Metadata key: the factory refuses to build an uploader.
pub const SETUP_FAIL: &str = "setup-fail";
/// Metadata key: the factory panics while building the uploader.
pub const PANIC_ON_CREATE: &str = "panic-on-create";

#[derive(Debug, Clone, Copy)]
enum Mode {
    Auto { delay: Duration },
    Manual,
}

/// Test-side view of one started upload.
#[derive(Clone)]
pub struct MockUpload {
    pub batch: BatchId,
    pub task: TaskId,
    pub request: UploadRequest,
    pub events: UploadEvents,
    aborted: Arc<AtomicBool>,
}

impl MockUpload {
    pub fn progress(&self, done: u64, total: u64) {
        self.events.progress(done, total);
    }

    pub fn complete(&self) {
        self.events.success();
    }

    pub fn fail(&self, status: u16) {
        self.events.error(UploadError::Http { status });
    }

    pub fn was_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

pub struct MockFactory {
    mode: Mode,
    uploads: Mutex<Vec<MockUpload>>,
    started: Notify,
    /// When set, `abort` blocks until the test releases a permit.
    abort_gate: Option<Arc<Notify>>,
    aborts_done: Arc<AtomicUsize>,
}

impl MockFactory {
    pub fn auto(delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(Mode::Auto { delay }, None))
    }

    pub fn manual() -> Arc<Self> {
        Arc::new(Self::build(Mode::Manual, None))
    }

    /// Manual factory whose aborts wait on `gate.notify_one()`.
    pub fn manual_gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self::build(Mode::Manual, Some(gate)))
    }

    fn build(mode: Mode, abort_gate: Option<Arc<Notify>>) -> Self {
        Self {
            mode,
            uploads: Mutex::new(Vec::new()),
            started: Notify::new(),
            abort_gate,
            aborts_done: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn uploads(&self) -> Vec<MockUpload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn aborts_done(&self) -> usize {
        self.aborts_done.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` uploads were created and return the `n`th.
    pub async fn nth_upload(&self, n: usize) -> MockUpload {
        let wait = async {
            loop {
                let notified = self.started.notified();
                if let Some(u) = self.uploads.lock().unwrap().get(n - 1).cloned() {
                    return u;
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("upload #{} was never created", n))
    }
}

impl UploaderFactory for MockFactory {
    fn create(
        &self,
        request: UploadRequest,
        events: UploadEvents,
    ) -> Result<Box<dyn Uploader>, UploadError> {
        if request.options.metadata.contains_key(SETUP_FAIL) {
            return Err(UploadError::Other("no uploader for this source".into()));
        }
        if request.options.metadata.contains_key(PANIC_ON_CREATE) {
            panic!("factory blew up for task {}", request.task_id);
        }
        let handle = MockUpload {
            batch: request.batch_id,
            task: request.task_id,
            request: request.clone(),
            events: events.clone(),
            aborted: Arc::new(AtomicBool::new(false)),
        };
        let uploader = MockUploader {
            mode: self.mode,
            fail_status: request
                .options
                .metadata
                .get(FAIL_STATUS)
                .and_then(|s| s.parse().ok()),
            events,
            aborted: Arc::clone(&handle.aborted),
            abort_gate: self.abort_gate.clone(),
            aborts_done: Arc::clone(&self.aborts_done),
            worker: None,
        };
        self.uploads.lock().unwrap().push(handle);
        self.started.notify_waiters();
        Ok(Box::new(uploader))
    }
}

struct MockUploader {
    mode: Mode,
    fail_status: Option<u16>,
    events: UploadEvents,
    aborted: Arc<AtomicBool>,
    abort_gate: Option<Arc<Notify>>,
    aborts_done: Arc<AtomicUsize>,
    worker: Option<JoinHandle<()>>,
}

#[async_trait]
impl Uploader for MockUploader {
    fn start(&mut self) {
        let Mode::Auto { delay } = self.mode else {
            return;
        };
        let events = self.events.clone();
        let fail_status = self.fail_status;
        self.worker = Some(tokio::spawn(async move {
            events.progress(0, 100);
            tokio::time::sleep(delay / 2).await;
            events.progress(50, 100);
            tokio::time::sleep(delay / 2).await;
            match fail_status {
                Some(status) => events.error(UploadError::Http { status }),
                None => {
                    events.progress(100, 100);
                    events.success();
                }
            }
        }));
    }

    async fn abort(&mut self, _terminate: bool) -> Result<(), UploadError> {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        if let Some(gate) = &self.abort_gate {
            gate.notified().await;
        }
        self.aborted.store(true, Ordering::SeqCst);
        self.aborts_done.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
