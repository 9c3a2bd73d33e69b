//! Callback sink that records every notification in order.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use upq_core::callbacks::UploadCallbacks;
use upq_core::error::TaskError;
use upq_core::task::{BatchId, TaskId};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Hold(BatchId, Vec<TaskId>),
    Start(BatchId, TaskId),
    Progress(BatchId, TaskId, u64, u64, f64),
    Success(BatchId, TaskId),
    Error(BatchId, TaskId, String),
}

impl Event {
    pub fn task(&self) -> Option<(BatchId, TaskId)> {
        match self {
            Event::Hold(..) => None,
            Event::Start(b, t)
            | Event::Progress(b, t, ..)
            | Event::Success(b, t)
            | Event::Error(b, t, _) => Some((*b, *t)),
        }
    }
}

#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
    changed: Notify,
}

impl Recorder {
    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
        self.changed.notify_waiters();
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn holds(&self) -> Vec<(BatchId, Vec<TaskId>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Hold(b, ids) => Some((b, ids)),
                _ => None,
            })
            .collect()
    }

    pub fn starts(&self) -> Vec<(BatchId, TaskId)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Start(b, t) => Some((b, t)),
                _ => None,
            })
            .collect()
    }

    pub fn successes(&self) -> Vec<(BatchId, TaskId)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Success(b, t) => Some((b, t)),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<(BatchId, TaskId, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Error(b, t, msg) => Some((b, t, msg)),
                _ => None,
            })
            .collect()
    }

    /// Events concerning one task, in order.
    pub fn for_task(&self, batch: BatchId, task: TaskId) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.task() == Some((batch, task)))
            .collect()
    }

    /// Wait until `pred` holds for the recorded events (fails after 5s).
    pub async fn wait_for(&self, what: &str, pred: impl Fn(&[Event]) -> bool) {
        let wait = async {
            loop {
                let notified = self.changed.notified();
                if pred(&self.events()) {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
            panic!("timed out waiting for {}: {:#?}", what, self.events());
        }
    }

    pub async fn wait_for_starts(&self, n: usize) {
        self.wait_for(&format!("{} starts", n), |ev| {
            ev.iter().filter(|e| matches!(e, Event::Start(..))).count() >= n
        })
        .await;
    }

    pub async fn wait_for_terminals(&self, n: usize) {
        self.wait_for(&format!("{} terminal events", n), |ev| {
            ev.iter()
                .filter(|e| matches!(e, Event::Success(..) | Event::Error(..)))
                .count()
                >= n
        })
        .await;
    }
}

impl UploadCallbacks for Recorder {
    fn on_hold(&self, batch: BatchId, task_ids: &[TaskId]) {
        self.push(Event::Hold(batch, task_ids.to_vec()));
    }

    fn on_start(&self, batch: BatchId, task: TaskId) {
        self.push(Event::Start(batch, task));
    }

    fn on_progress(&self, batch: BatchId, task: TaskId, bytes_done: u64, bytes_total: u64, percent: f64) {
        self.push(Event::Progress(batch, task, bytes_done, bytes_total, percent));
    }

    fn on_success(&self, batch: BatchId, task: TaskId) {
        self.push(Event::Success(batch, task));
    }

    fn on_error(&self, batch: BatchId, task: TaskId, error: &TaskError) {
        self.push(Event::Error(batch, task, error.to_string()));
    }
}
