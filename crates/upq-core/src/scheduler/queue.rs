//! Per-batch bookkeeping: pending list, single active slot, token registry.
//!
//! Plain data with no I/O so the "one active task per batch" rule can be
//! checked directly. The runner owns one of these; while a batch waits for
//! admission the scheduler holds it instead.

use std::collections::VecDeque;

use crate::task::{BatchId, TaskId, UploadTask};
use crate::token::{CancelSignal, CancelToken, TokenRegistry};

/// Task currently occupying the active slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveTask {
    pub task_id: TaskId,
    /// Serial of the token bound to this occupancy.
    pub serial: u64,
}

/// Task just moved from pending to active.
#[derive(Debug)]
pub struct NextTask {
    pub task: UploadTask,
    pub serial: u64,
    pub cancel: CancelSignal,
}

#[derive(Debug)]
pub struct BatchQueue {
    batch_id: BatchId,
    pending: VecDeque<UploadTask>,
    active: Option<ActiveTask>,
    tokens: TokenRegistry,
}

impl BatchQueue {
    pub fn new(batch_id: BatchId) -> Self {
        Self {
            batch_id,
            pending: VecDeque::new(),
            active: None,
            tokens: TokenRegistry::new(),
        }
    }

    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    /// Append tasks in order, minting a token for each. Tasks whose id is
    /// already pending or active are left out; their ids are returned.
    pub fn enqueue(&mut self, tasks: Vec<UploadTask>) -> Vec<TaskId> {
        let mut rejected = Vec::new();
        for mut task in tasks {
            if self.tokens.register(task.id).is_none() {
                rejected.push(task.id);
                continue;
            }
            task.batch_id = self.batch_id;
            self.pending.push_back(task);
        }
        rejected
    }

    /// Pop the head of the pending list into the active slot.
    /// Returns `None` if a task is already active or nothing is pending.
    pub fn pop_next(&mut self) -> Option<NextTask> {
        if self.active.is_some() {
            return None;
        }
        let task = self.pending.pop_front()?;
        let token = self.tokens.get(task.id)?;
        let next = NextTask {
            serial: token.serial(),
            cancel: token.signal(),
            task,
        };
        self.active = Some(ActiveTask {
            task_id: next.task.id,
            serial: next.serial,
        });
        Some(next)
    }

    pub fn active(&self) -> Option<ActiveTask> {
        self.active
    }

    /// Clear the active slot and release its token if `serial` still names
    /// the current occupancy. Returns the finished task id.
    pub fn finish_active(&mut self, serial: u64) -> Option<TaskId> {
        let active = self.active.filter(|a| a.serial == serial)?;
        self.active = None;
        self.tokens.release(active.task_id);
        Some(active.task_id)
    }

    /// Drop a pending task and release its token. False if it is not pending.
    pub fn remove_pending(&mut self, task_id: TaskId) -> bool {
        let Some(pos) = self.pending.iter().position(|t| t.id == task_id) else {
            return false;
        };
        self.pending.remove(pos);
        self.tokens.release(task_id);
        true
    }

    /// Drop every pending task, releasing their tokens. The active task stays.
    pub fn clear_pending(&mut self) -> Vec<TaskId> {
        let ids: Vec<TaskId> = self.pending.drain(..).map(|t| t.id).collect();
        for id in &ids {
            self.tokens.release(*id);
        }
        ids
    }

    pub fn token(&self, task_id: TaskId) -> Option<&CancelToken> {
        self.tokens.get(task_id)
    }

    pub fn pending_ids(&self) -> Vec<TaskId> {
        self.pending.iter().map(|t| t.id).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Nothing pending and nothing active.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active.is_none()
    }

    /// Tokens alive; always pending + active.
    pub fn live_tokens(&self) -> usize {
        self.tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::UploadSource;
    use crate::token::TokenState;
    use std::path::PathBuf;

    fn tasks(batch: BatchId, ids: &[TaskId]) -> Vec<UploadTask> {
        ids.iter()
            .map(|id| UploadTask::new(batch, *id, UploadSource::File(PathBuf::from("f"))))
            .collect()
    }

    #[test]
    fn drains_in_submission_order_one_at_a_time() {
        let mut q = BatchQueue::new(1);
        assert!(q.enqueue(tasks(1, &[10, 11, 12])).is_empty());
        assert_eq!(q.live_tokens(), 3);

        let first = q.pop_next().unwrap();
        assert_eq!(first.task.id, 10);
        assert!(q.pop_next().is_none(), "second task must wait for the first");

        assert_eq!(q.finish_active(first.serial), Some(10));
        assert_eq!(q.pop_next().unwrap().task.id, 11);
        assert_eq!(q.live_tokens(), 2);
    }

    #[test]
    fn duplicate_ids_are_rejected_while_occupied() {
        let mut q = BatchQueue::new(1);
        q.enqueue(tasks(1, &[1, 2]));
        assert_eq!(q.enqueue(tasks(1, &[2, 3, 3])), vec![2, 3]);
        assert_eq!(q.pending_ids(), vec![1, 2, 3]);

        let active = q.pop_next().unwrap();
        assert_eq!(q.enqueue(tasks(1, &[1])), vec![1]);
        q.finish_active(active.serial);
        assert!(q.enqueue(tasks(1, &[1])).is_empty());
    }

    #[test]
    fn stale_serial_does_not_clear_new_occupancy() {
        let mut q = BatchQueue::new(1);
        q.enqueue(tasks(1, &[5]));
        let old = q.pop_next().unwrap();
        q.finish_active(old.serial);

        q.enqueue(tasks(1, &[5]));
        let new = q.pop_next().unwrap();
        assert_ne!(old.serial, new.serial);
        assert_eq!(q.finish_active(old.serial), None);
        assert_eq!(q.active().map(|a| a.task_id), Some(5));
    }

    #[test]
    fn remove_and_clear_pending_release_tokens() {
        let mut q = BatchQueue::new(1);
        q.enqueue(tasks(1, &[1, 2, 3, 4]));
        let active = q.pop_next().unwrap();
        assert!(q.remove_pending(3));
        assert!(!q.remove_pending(3));
        assert!(!q.remove_pending(active.task.id), "active task is not pending");
        assert_eq!(q.clear_pending(), vec![2, 4]);
        assert_eq!(q.live_tokens(), 1);
        assert!(!q.is_idle());
        q.finish_active(active.serial);
        assert!(q.is_idle());
        assert_eq!(q.live_tokens(), 0);
    }

    #[test]
    fn active_token_is_observable_through_signal() {
        let mut q = BatchQueue::new(1);
        q.enqueue(tasks(1, &[1]));
        let next = q.pop_next().unwrap();
        let token = q.token(1).unwrap();
        assert_eq!(token.state(), TokenState::Active);
        token.request_cancel();
        assert!(next.cancel.is_cancel_requested());
    }

    #[test]
    fn enqueue_stamps_batch_id() {
        let mut q = BatchQueue::new(9);
        q.enqueue(tasks(1, &[1]));
        assert_eq!(q.pop_next().unwrap().task.batch_id, 9);
    }
}
