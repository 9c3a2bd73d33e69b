//! Batched, resumable upload scheduling.
//!
//! [`BatchScheduler`] admits batches under a global concurrency bound and
//! uploads each batch's tasks one at a time through an [`uploader::Uploader`].

pub mod callbacks;
pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod task;
pub mod token;
pub mod uploader;

pub use callbacks::UploadCallbacks;
pub use error::{SchedulerError, TaskError, UploadError};
pub use scheduler::{BatchScheduler, SchedulerSettings, SchedulerSnapshot};
pub use task::{BatchId, TaskId, UploadSource, UploadTask};
pub use token::{CancelSignal, TokenState};
