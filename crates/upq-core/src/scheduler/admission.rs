//! Admission bookkeeping shared by the scheduler handle and its runners.
//!
//! Everything here sits behind one mutex. Runners retire through
//! [`AdmissionState::retire`], which removes the batch and admits the next
//! waiting one in the same critical section.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::{mpsc, Notify};

use crate::callbacks::UploadCallbacks;
use crate::config::UpqConfig;
use crate::error::TaskError;
use crate::retry::RetrySchedule;
use crate::task::{BatchId, TaskId};
use crate::uploader::UploaderFactory;

use super::queue::BatchQueue;
use super::runner::{RunnerCommand, TaskRunner};

/// Scheduler settings (subset of `UpqConfig` the engine needs).
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Batches allowed to upload at the same time (clamped to at least 1).
    pub max_concurrent_batches: usize,
    pub endpoint: String,
    pub retry_delays: RetrySchedule,
    pub offline_message: Option<String>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&UpqConfig::default())
    }
}

impl From<&UpqConfig> for SchedulerSettings {
    fn from(cfg: &UpqConfig) -> Self {
        Self {
            max_concurrent_batches: cfg.max_concurrent_batches(),
            endpoint: cfg.server_endpoint.clone(),
            retry_delays: cfg.retry_schedule(),
            offline_message: cfg.offline_message.clone(),
        }
    }
}

/// Error to report to the sink once the admission lock is released.
pub(crate) type DeferredError = (BatchId, TaskId, TaskError);

pub(crate) enum BatchEntry {
    /// Not admitted yet; the scheduler holds the tasks.
    Waiting(BatchQueue),
    /// Admitted; a runner owns the tasks.
    Running(mpsc::UnboundedSender<RunnerCommand>),
}

#[derive(Default)]
pub(crate) struct AdmissionState {
    pub(crate) entries: HashMap<BatchId, BatchEntry>,
    /// Admitted batch ids in admission order.
    pub(crate) admitted: Vec<BatchId>,
    /// FIFO of batch ids awaiting admission.
    pub(crate) waiting: VecDeque<BatchId>,
}

pub(crate) struct Shared {
    pub(crate) settings: SchedulerSettings,
    pub(crate) factory: Arc<dyn UploaderFactory>,
    pub(crate) callbacks: RwLock<Option<Arc<dyn UploadCallbacks>>>,
    pub(crate) state: Mutex<AdmissionState>,
    /// Woken whenever the map becomes empty.
    pub(crate) idle: Notify,
}

impl Shared {
    pub(crate) fn new(settings: SchedulerSettings, factory: Arc<dyn UploaderFactory>) -> Self {
        Self {
            settings,
            factory,
            callbacks: RwLock::new(None),
            state: Mutex::new(AdmissionState::default()),
            idle: Notify::new(),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, AdmissionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn callbacks(&self) -> Option<Arc<dyn UploadCallbacks>> {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn bind_callbacks(&self, callbacks: Arc<dyn UploadCallbacks>) {
        *self.callbacks.write().unwrap_or_else(PoisonError::into_inner) = Some(callbacks);
    }

    fn max_concurrent(&self) -> usize {
        self.settings.max_concurrent_batches.max(1)
    }
}

/// Report errors collected under the admission lock.
pub(crate) fn emit_deferred(callbacks: &dyn UploadCallbacks, errors: Vec<DeferredError>) {
    for (batch, task, err) in errors {
        tracing::warn!(batch, task, "task rejected: {}", err);
        callbacks.on_error(batch, task, &err);
    }
}

impl AdmissionState {
    /// Place a new batch: start it if a slot is free, otherwise queue it.
    pub(crate) fn place(
        &mut self,
        shared: &Arc<Shared>,
        callbacks: &Arc<dyn UploadCallbacks>,
        queue: BatchQueue,
    ) -> Vec<DeferredError> {
        let batch = queue.batch_id();
        if self.admitted.len() < shared.max_concurrent() {
            return self.start_runner(shared, callbacks, queue);
        }
        tracing::debug!(batch, waiting = self.waiting.len() + 1, "batch on hold, no free slot");
        self.waiting.push_back(batch);
        self.entries.insert(batch, BatchEntry::Waiting(queue));
        Vec::new()
    }

    fn start_runner(
        &mut self,
        shared: &Arc<Shared>,
        callbacks: &Arc<dyn UploadCallbacks>,
        queue: BatchQueue,
    ) -> Vec<DeferredError> {
        let batch = queue.batch_id();
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(rt) => rt,
            Err(e) => {
                let reason = e.to_string();
                return queue
                    .pending_ids()
                    .into_iter()
                    .map(|task| (batch, task, TaskError::RunnerUnavailable(reason.clone())))
                    .collect();
            }
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let own_tx = tx.clone();
        self.entries.insert(batch, BatchEntry::Running(tx));
        self.admitted.push(batch);
        tracing::debug!(batch, admitted = self.admitted.len(), "batch admitted");
        let runner = TaskRunner::new(queue, rx, Arc::clone(shared), Arc::clone(callbacks));
        let shared = Arc::clone(shared);
        let callbacks = Arc::clone(callbacks);
        runtime.spawn(async move {
            let Err(e) = tokio::spawn(runner.run()).await else {
                return;
            };
            tracing::error!(batch, "batch runner died: {}", e);
            let errors = shared
                .lock_state()
                .reap_runner(&shared, &callbacks, batch, &own_tx);
            emit_deferred(callbacks.as_ref(), errors);
        });
        Vec::new()
    }

    /// Admit waiting batches in arrival order while slots are free.
    pub(crate) fn admit_waiting(
        &mut self,
        shared: &Arc<Shared>,
        callbacks: &Arc<dyn UploadCallbacks>,
    ) -> Vec<DeferredError> {
        let mut errors = Vec::new();
        while self.admitted.len() < shared.max_concurrent() {
            let Some(batch) = self.waiting.pop_front() else {
                break;
            };
            match self.entries.remove(&batch) {
                Some(BatchEntry::Waiting(queue)) => {
                    errors.extend(self.start_runner(shared, callbacks, queue));
                }
                Some(running @ BatchEntry::Running(_)) => {
                    self.entries.insert(batch, running);
                }
                None => {}
            }
        }
        self.notify_if_empty(shared);
        errors
    }

    /// Remove an idle admitted batch and hand its slot to the next waiting one.
    pub(crate) fn retire(
        &mut self,
        shared: &Arc<Shared>,
        callbacks: &Arc<dyn UploadCallbacks>,
        batch: BatchId,
    ) -> Vec<DeferredError> {
        self.entries.remove(&batch);
        self.admitted.retain(|b| *b != batch);
        tracing::debug!(batch, admitted = self.admitted.len(), "batch idle, slot freed");
        self.admit_waiting(shared, callbacks)
    }

    /// Drop a batch that never got admitted.
    pub(crate) fn drop_waiting(&mut self, shared: &Shared, batch: BatchId) {
        self.entries.remove(&batch);
        self.waiting.retain(|b| *b != batch);
        self.notify_if_empty(shared);
    }

    /// Forget a runner whose command channel is gone (the task died) and
    /// hand its slot to the next waiting batch.
    pub(crate) fn drop_dead_runner(
        &mut self,
        shared: &Arc<Shared>,
        callbacks: &Arc<dyn UploadCallbacks>,
        batch: BatchId,
    ) -> Vec<DeferredError> {
        tracing::warn!(batch, "batch runner is gone, dropping its entry");
        self.entries.remove(&batch);
        self.admitted.retain(|b| *b != batch);
        self.admit_waiting(shared, callbacks)
    }

    /// Drop the entry of a runner that exited without retiring, unless the
    /// batch was already re-admitted with a different runner.
    fn reap_runner(
        &mut self,
        shared: &Arc<Shared>,
        callbacks: &Arc<dyn UploadCallbacks>,
        batch: BatchId,
        runner_tx: &mpsc::UnboundedSender<RunnerCommand>,
    ) -> Vec<DeferredError> {
        match self.entries.get(&batch) {
            Some(BatchEntry::Running(tx)) if tx.same_channel(runner_tx) => {
                self.drop_dead_runner(shared, callbacks, batch)
            }
            _ => Vec::new(),
        }
    }

    fn notify_if_empty(&self, shared: &Shared) {
        if self.entries.is_empty() {
            shared.idle.notify_waiters();
        }
    }
}
