//! Per-task cancellation tokens and the per-batch token registry.
//!
//! Each pending or active task owns exactly one token. The runner moves it
//! from `Active` to `CancelRequested` when a cancel arrives, and to
//! `CancelAcknowledged` once the uploader's abort has finished. Uploaders
//! only get a read-only [`CancelSignal`] view.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use crate::task::TaskId;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a cancellation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Active,
    CancelRequested,
    CancelAcknowledged,
}

/// Cancellation handle for one occupancy of a task id.
///
/// The serial is process-unique: re-submitting a finished task id mints a
/// new token with a new serial, so events from the old occupancy can be told
/// apart from the new one.
#[derive(Debug)]
pub struct CancelToken {
    task_id: TaskId,
    serial: u64,
    state: watch::Sender<TokenState>,
}

impl CancelToken {
    pub(crate) fn mint(task_id: TaskId) -> Self {
        let (state, _) = watch::channel(TokenState::Active);
        Self {
            task_id,
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            state,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn state(&self) -> TokenState {
        *self.state.borrow()
    }

    /// Read-only view handed to the uploader.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.state.subscribe(),
        }
    }

    /// Move to `CancelRequested`. Returns false if a cancel was already requested.
    pub(crate) fn request_cancel(&self) -> bool {
        self.state.send_if_modified(|s| {
            if *s == TokenState::Active {
                *s = TokenState::CancelRequested;
                true
            } else {
                false
            }
        })
    }

    /// Record that the uploader finished aborting.
    pub(crate) fn acknowledge(&self) {
        self.state.send_replace(TokenState::CancelAcknowledged);
    }
}

/// Observer side of a [`CancelToken`].
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<TokenState>,
}

impl CancelSignal {
    pub fn is_cancel_requested(&self) -> bool {
        *self.rx.borrow() != TokenState::Active
    }

    /// Resolves once cancellation has been requested, or the token was released.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|s| *s != TokenState::Active).await;
    }
}

/// Tokens of one batch keyed by task id. Only the batch's runner touches it.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: HashMap<TaskId, CancelToken>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint and register a token for `task_id`. Returns `None` if the id is
    /// already occupied (pending or active).
    pub fn register(&mut self, task_id: TaskId) -> Option<u64> {
        if self.tokens.contains_key(&task_id) {
            return None;
        }
        let token = CancelToken::mint(task_id);
        let serial = token.serial();
        self.tokens.insert(task_id, token);
        Some(serial)
    }

    pub fn get(&self, task_id: TaskId) -> Option<&CancelToken> {
        self.tokens.get(&task_id)
    }

    /// Release the token (call when the task leaves pending/active).
    pub fn release(&mut self, task_id: TaskId) -> Option<CancelToken> {
        self.tokens.remove(&task_id)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_state_transitions() {
        let token = CancelToken::mint(3);
        assert_eq!(token.state(), TokenState::Active);
        let signal = token.signal();
        assert!(!signal.is_cancel_requested());

        assert!(token.request_cancel());
        assert!(!token.request_cancel());
        assert_eq!(token.state(), TokenState::CancelRequested);
        assert!(signal.is_cancel_requested());

        token.acknowledge();
        assert_eq!(token.state(), TokenState::CancelAcknowledged);
    }

    #[test]
    fn serials_are_never_reused() {
        let mut reg = TokenRegistry::new();
        let first = reg.register(1).unwrap();
        assert!(reg.register(1).is_none());
        reg.release(1);
        let second = reg.register(1).unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn cancelled_resolves_on_request() {
        let token = CancelToken::mint(1);
        let mut signal = token.signal();
        let waiter = tokio::spawn(async move { signal.cancelled().await });
        token.request_cancel();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_resolves_when_token_released() {
        let token = CancelToken::mint(1);
        let mut signal = token.signal();
        drop(token);
        signal.cancelled().await;
    }
}
