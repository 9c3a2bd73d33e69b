//! Per-batch runner: a single tokio task that owns the batch state and
//! uploads its tasks one after another.
//!
//! Commands from the scheduler handle and events from the active uploader
//! arrive on two channels; this task is their only consumer, so batch state
//! has a single writer.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::callbacks::UploadCallbacks;
use crate::error::TaskError;
use crate::progress::ProgressStats;
use crate::task::{TaskId, UploadTask};
use crate::token::TokenState;
use crate::uploader::{TaggedEvent, UploadEvent, UploadEvents, UploadOptions, UploadRequest, Uploader};

use super::admission::{emit_deferred, Shared};
use super::queue::BatchQueue;

pub(crate) enum RunnerCommand {
    Enqueue(Vec<UploadTask>),
    /// Reply is sent once the task is gone (after abort for the active task).
    CancelTask {
        task: TaskId,
        done: oneshot::Sender<()>,
    },
    /// Drop everything pending and abort the active task.
    CancelAll { done: oneshot::Sender<()> },
}

pub(crate) struct TaskRunner {
    queue: BatchQueue,
    uploader: Option<Box<dyn Uploader>>,
    commands: mpsc::UnboundedReceiver<RunnerCommand>,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    events: mpsc::UnboundedReceiver<TaggedEvent>,
    shared: Arc<Shared>,
    callbacks: Arc<dyn UploadCallbacks>,
    /// Cancel replies held until the idle check of the current step ran.
    replies: Vec<oneshot::Sender<()>>,
}

impl TaskRunner {
    pub(crate) fn new(
        queue: BatchQueue,
        commands: mpsc::UnboundedReceiver<RunnerCommand>,
        shared: Arc<Shared>,
        callbacks: Arc<dyn UploadCallbacks>,
    ) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        Self {
            queue,
            uploader: None,
            commands,
            events_tx,
            events,
            shared,
            callbacks,
            replies: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        let batch = self.queue.batch_id();
        tracing::debug!(batch, pending = self.queue.pending_len(), "batch runner started");
        loop {
            while let Ok(cmd) = self.commands.try_recv() {
                self.handle_command(cmd).await;
            }
            self.drain();

            if self.queue.is_idle() {
                match self.try_retire() {
                    Some(cmd) => {
                        self.handle_command(cmd).await;
                        continue;
                    }
                    None => {
                        tracing::debug!(batch, "batch runner finished");
                        return;
                    }
                }
            }
            self.flush_replies();

            // Outcomes already reported win over a cancel that arrives with them.
            // Neither channel closes while the runner is alive: it keeps
            // `events_tx` and its supervisor keeps a command sender.
            tokio::select! {
                biased;
                Some(ev) = self.events.recv() => self.handle_event(ev),
                Some(cmd) = self.commands.recv() => self.handle_command(cmd).await,
            }
        }
    }

    /// Start pending tasks until one is active or the list is empty.
    fn drain(&mut self) {
        let batch = self.queue.batch_id();
        while let Some(next) = self.queue.pop_next() {
            let task_id = next.task.id;
            let events = UploadEvents::new(
                next.serial,
                self.events_tx.clone(),
                next.cancel,
                self.shared.settings.retry_delays.clone(),
            );
            let request = UploadRequest {
                batch_id: batch,
                task_id,
                options: UploadOptions::for_task(
                    &next.task,
                    &self.shared.settings.endpoint,
                    &self.shared.settings.retry_delays,
                ),
                source: next.task.source,
            };
            match self.shared.factory.create(request, events) {
                Ok(mut uploader) => {
                    tracing::debug!(batch, task = task_id, "upload started");
                    self.callbacks.on_start(batch, task_id);
                    uploader.start();
                    self.uploader = Some(uploader);
                    return;
                }
                Err(e) => {
                    self.queue.finish_active(next.serial);
                    let err = TaskError::Setup(e.to_string());
                    tracing::warn!(batch, task = task_id, "{}", err);
                    self.callbacks.on_error(batch, task_id, &err);
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: RunnerCommand) {
        let batch = self.queue.batch_id();
        match cmd {
            RunnerCommand::Enqueue(tasks) => {
                for task in self.queue.enqueue(tasks) {
                    let err = TaskError::Duplicate { task };
                    tracing::warn!(batch, task, "{}", err);
                    self.callbacks.on_error(batch, task, &err);
                }
            }
            RunnerCommand::CancelTask { task, done } => {
                if self.queue.remove_pending(task) {
                    tracing::debug!(batch, task, "pending task cancelled");
                } else if self.queue.active().map(|a| a.task_id) == Some(task) {
                    self.abort_active().await;
                } else {
                    tracing::debug!(batch, task, "cancel for finished or unknown task ignored");
                }
                self.replies.push(done);
            }
            RunnerCommand::CancelAll { done } => {
                let dropped = self.queue.clear_pending();
                tracing::debug!(batch, dropped = dropped.len(), "cancelling batch");
                self.abort_active().await;
                self.replies.push(done);
            }
        }
    }

    /// Two-phase cancel of the active task: request, wait for the uploader's
    /// abort to finish, acknowledge, then free the slot.
    async fn abort_active(&mut self) {
        let batch = self.queue.batch_id();
        let Some(active) = self.queue.active() else {
            return;
        };
        if let Some(token) = self.queue.token(active.task_id) {
            token.request_cancel();
        }
        if let Some(mut uploader) = self.uploader.take() {
            if let Err(e) = uploader.abort(false).await {
                tracing::warn!(batch, task = active.task_id, "abort failed: {}", e);
            }
        }
        if let Some(token) = self.queue.token(active.task_id) {
            token.acknowledge();
        }
        self.queue.finish_active(active.serial);
        tracing::info!(batch, task = active.task_id, "upload cancelled");
    }

    fn handle_event(&mut self, ev: TaggedEvent) {
        let batch = self.queue.batch_id();
        let Some(active) = self.queue.active().filter(|a| a.serial == ev.serial) else {
            tracing::trace!(batch, serial = ev.serial, "dropping event from a finished upload");
            return;
        };
        if self
            .queue
            .token(active.task_id)
            .is_some_and(|t| t.state() != TokenState::Active)
        {
            return;
        }
        let task = active.task_id;
        match ev.event {
            UploadEvent::Progress {
                bytes_done,
                bytes_total,
            } => {
                let stats = ProgressStats::new(bytes_done, bytes_total);
                self.callbacks
                    .on_progress(batch, task, bytes_done, bytes_total, stats.percent());
            }
            UploadEvent::Success => {
                self.queue.finish_active(ev.serial);
                self.uploader = None;
                tracing::info!(batch, task, "upload completed");
                self.callbacks.on_success(batch, task);
            }
            UploadEvent::Error(e) => {
                self.queue.finish_active(ev.serial);
                self.uploader = None;
                let err = TaskError::Transport(e);
                tracing::warn!(batch, task, "{}", err);
                self.callbacks.on_error(batch, task, &err);
            }
        }
    }

    /// Under the admission lock: if no command is waiting, remove this batch
    /// and admit the next one. Otherwise hand the command back.
    fn try_retire(&mut self) -> Option<RunnerCommand> {
        let batch = self.queue.batch_id();
        let errors = {
            let mut state = self.shared.lock_state();
            if let Ok(cmd) = self.commands.try_recv() {
                return Some(cmd);
            }
            state.retire(&self.shared, &self.callbacks, batch)
        };
        self.flush_replies();
        emit_deferred(self.callbacks.as_ref(), errors);
        None
    }

    fn flush_replies(&mut self) {
        for done in self.replies.drain(..) {
            let _ = done.send(());
        }
    }
}
