//! Retry schedule and permanent-rejection classification.
//!
//! Backoff timing belongs to the uploader; this module gives uploaders a
//! shared delay schedule, the retry-decision hook and an async retry loop so
//! every transfer backend makes the same decisions.

mod classify;
mod policy;
mod run;

pub use classify::{classify, classify_http_status, classify_io_error, should_retry};
pub use policy::{ErrorKind, RetryDecision, RetrySchedule, DEFAULT_RETRY_DELAYS_MS};
pub use run::run_with_retry;
