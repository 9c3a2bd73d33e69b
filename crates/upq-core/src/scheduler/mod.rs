//! Batch scheduler and per-batch task runners.
//!
//! Two levels of concurrency: at most `max_concurrent_batches` batches are
//! admitted at once (the rest wait in FIFO order), and each admitted batch
//! uploads its tasks strictly one at a time, in submission order.
//! Admission bookkeeping lives behind one mutex; each batch's own state is
//! owned by its runner task.

mod admission;
mod batch_scheduler;
mod queue;
mod runner;

pub use admission::SchedulerSettings;
pub use batch_scheduler::{BatchScheduler, SchedulerSnapshot};
pub use queue::{ActiveTask, BatchQueue, NextTask};

