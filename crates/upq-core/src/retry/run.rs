//! Retry loop: run an attempt until success, permanent rejection, schedule
//! exhaustion or cancellation.

use std::future::Future;

use crate::error::UploadError;
use crate::token::CancelSignal;

use super::classify;
use super::policy::{RetryDecision, RetrySchedule};

/// Runs `attempt_fn(attempt)` (1-based) until it succeeds or the schedule says
/// to stop. Between attempts sleeps for the scheduled delay; if `cancel` fires
/// during the sleep the last error is returned without another attempt.
pub async fn run_with_retry<T, F, Fut>(
    schedule: &RetrySchedule,
    mut cancel: Option<CancelSignal>,
    mut attempt_fn: F,
) -> Result<T, UploadError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, UploadError>>,
{
    let mut attempt = 1u32;
    loop {
        let err = match attempt_fn(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        let delay = match schedule.decide(attempt, classify::classify(&err)) {
            RetryDecision::NoRetry => return Err(err),
            RetryDecision::RetryAfter(d) => d,
        };
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "attempt failed: {}", err);
        match cancel.as_mut() {
            Some(signal) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = signal.cancelled() => return Err(err),
                }
            }
            None => tokio::time::sleep(delay).await,
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let schedule = RetrySchedule::from_millis(&[100, 200, 300]);
        let out = run_with_retry(&schedule, None, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(UploadError::Http { status: 502 })
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_rejection_is_attempted_once() {
        let calls = AtomicU32::new(0);
        let schedule = RetrySchedule::default();
        let err = run_with_retry(&schedule, None, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(UploadError::Http { status: 403 }) }
        })
        .await
        .unwrap_err();
        assert!(err.is_permanent_rejection());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_schedule_exhausted() {
        let calls = AtomicU32::new(0);
        let schedule = RetrySchedule::from_millis(&[10, 10]);
        let res = run_with_retry(&schedule, None, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(UploadError::Connection("reset".into())) }
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retrying() {
        let token = crate::token::CancelToken::mint(1);
        token.request_cancel();
        let calls = AtomicU32::new(0);
        let schedule = RetrySchedule::default();
        let res = run_with_retry(&schedule, Some(token.signal()), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(UploadError::Http { status: 500 }) }
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
