//! Public handle: submission, cancellation and admission queries.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::callbacks::UploadCallbacks;
use crate::error::{SchedulerError, TaskError};
use crate::task::{BatchId, TaskId, UploadTask};
use crate::uploader::UploaderFactory;

use super::admission::{emit_deferred, BatchEntry, SchedulerSettings, Shared};
use super::queue::BatchQueue;
use super::runner::RunnerCommand;

/// Point-in-time view of admission state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    /// Admitted batches in admission order.
    pub admitted: Vec<BatchId>,
    /// Batches waiting for a slot, next to be admitted first.
    pub waiting: Vec<BatchId>,
}

/// Schedules batches of uploads: at most `max_concurrent_batches` batches
/// run at once, each uploading one task at a time.
///
/// Cloning yields another handle to the same scheduler. Must be used from
/// within a tokio runtime; without one, submitted tasks are reported as
/// failed through `on_error`.
#[derive(Clone)]
pub struct BatchScheduler {
    shared: Arc<Shared>,
}

impl BatchScheduler {
    /// Scheduler without a callback sink; call [`bind_callbacks`](Self::bind_callbacks)
    /// before submitting.
    pub fn new(settings: SchedulerSettings, factory: Arc<dyn UploaderFactory>) -> Self {
        Self {
            shared: Arc::new(Shared::new(settings, factory)),
        }
    }

    pub fn with_callbacks(
        settings: SchedulerSettings,
        factory: Arc<dyn UploaderFactory>,
        callbacks: Arc<dyn UploadCallbacks>,
    ) -> Self {
        let scheduler = Self::new(settings, factory);
        scheduler.bind_callbacks(callbacks);
        scheduler
    }

    /// Bind (or replace) the callback sink. Runners already started keep the
    /// sink they were started with.
    pub fn bind_callbacks(&self, callbacks: Arc<dyn UploadCallbacks>) {
        self.shared.bind_callbacks(callbacks);
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.shared.settings
    }

    fn require_callbacks(&self) -> Result<Arc<dyn UploadCallbacks>, SchedulerError> {
        self.shared
            .callbacks()
            .ok_or(SchedulerError::CallbacksNotBound)
    }

    /// Submit tasks for a batch. Fires `on_hold` with the task ids before
    /// deciding admission. An unseen batch starts right away if a slot is
    /// free and queues otherwise; a known batch just gets the tasks appended.
    pub fn submit(&self, batch: BatchId, tasks: Vec<UploadTask>) -> Result<(), SchedulerError> {
        let callbacks = self.require_callbacks()?;
        if tasks.is_empty() {
            return Ok(());
        }
        let ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
        callbacks.on_hold(batch, &ids);

        let mut errors = Vec::new();
        {
            let mut state = self.shared.lock_state();
            let mut tasks = tasks;
            let mut dead_runner = false;
            match state.entries.get_mut(&batch) {
                Some(BatchEntry::Waiting(queue)) => {
                    for task in queue.enqueue(tasks) {
                        errors.push((batch, task, TaskError::Duplicate { task }));
                    }
                    tasks = Vec::new();
                }
                Some(BatchEntry::Running(tx)) => match tx.send(RunnerCommand::Enqueue(tasks)) {
                    Ok(()) => tasks = Vec::new(),
                    Err(e) => {
                        dead_runner = true;
                        tasks = match e.0 {
                            RunnerCommand::Enqueue(t) => t,
                            _ => Vec::new(),
                        };
                    }
                },
                None => {}
            }
            if dead_runner {
                errors.extend(state.drop_dead_runner(&self.shared, &callbacks, batch));
            }
            if !tasks.is_empty() {
                let mut queue = BatchQueue::new(batch);
                for task in queue.enqueue(tasks) {
                    errors.push((batch, task, TaskError::Duplicate { task }));
                }
                errors.extend(state.place(&self.shared, &callbacks, queue));
            }
        }
        tracing::debug!(batch, tasks = ids.len(), "tasks submitted");
        emit_deferred(callbacks.as_ref(), errors);
        Ok(())
    }

    /// Cancel one task. Resolves immediately for pending or unknown tasks;
    /// for the active task, resolves once the uploader's abort finished.
    pub async fn cancel_task(&self, batch: BatchId, task: TaskId) -> Result<(), SchedulerError> {
        let callbacks = self.require_callbacks()?;
        let done = {
            let mut state = self.shared.lock_state();
            match state.entries.get_mut(&batch) {
                None => return Ok(()),
                Some(BatchEntry::Waiting(queue)) => {
                    if queue.remove_pending(task) {
                        tracing::debug!(batch, task, "held task cancelled");
                    }
                    if queue.is_idle() {
                        state.drop_waiting(&self.shared, batch);
                    }
                    return Ok(());
                }
                Some(BatchEntry::Running(tx)) => {
                    let (done_tx, done_rx) = oneshot::channel();
                    if tx
                        .send(RunnerCommand::CancelTask {
                            task,
                            done: done_tx,
                        })
                        .is_err()
                    {
                        let errors = state.drop_dead_runner(&self.shared, &callbacks, batch);
                        drop(state);
                        emit_deferred(callbacks.as_ref(), errors);
                        return Ok(());
                    }
                    done_rx
                }
            }
        };
        let _ = done.await;
        Ok(())
    }

    /// Cancel every task of a batch and free its slot, admitting the next
    /// waiting batch. Resolves after the active upload acknowledged its abort.
    pub async fn cancel_batch(&self, batch: BatchId) -> Result<(), SchedulerError> {
        let callbacks = self.require_callbacks()?;
        let done = {
            let mut state = self.shared.lock_state();
            match state.entries.get(&batch) {
                None => return Ok(()),
                Some(BatchEntry::Waiting(_)) => {
                    tracing::debug!(batch, "held batch cancelled");
                    state.drop_waiting(&self.shared, batch);
                    return Ok(());
                }
                Some(BatchEntry::Running(tx)) => {
                    let (done_tx, done_rx) = oneshot::channel();
                    if tx.send(RunnerCommand::CancelAll { done: done_tx }).is_err() {
                        let errors = state.drop_dead_runner(&self.shared, &callbacks, batch);
                        drop(state);
                        emit_deferred(callbacks.as_ref(), errors);
                        return Ok(());
                    }
                    done_rx
                }
            }
        };
        let _ = done.await;
        Ok(())
    }

    /// True while any batch is admitted or waiting.
    pub fn has_pending_work(&self) -> bool {
        !self.shared.lock_state().entries.is_empty()
    }

    /// Configured offline message, only while uploads are pending.
    pub fn offline_notice(&self) -> Option<String> {
        if self.has_pending_work() {
            self.shared.settings.offline_message.clone()
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let state = self.shared.lock_state();
        SchedulerSnapshot {
            admitted: state.admitted.clone(),
            waiting: state.waiting.iter().copied().collect(),
        }
    }

    /// Resolves once no batch is admitted or waiting.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if !self.has_pending_work() {
                return;
            }
            notified.await;
        }
    }
}
