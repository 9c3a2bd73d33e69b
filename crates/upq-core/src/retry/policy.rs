use std::time::Duration;

/// Delays used when the config does not override them (milliseconds).
pub const DEFAULT_RETRY_DELAYS_MS: [u64; 9] =
    [3000, 6000, 9000, 12000, 15000, 18000, 21000, 30000, 60000];

/// High-level classification of an upload error for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation timed out (connect/read).
    Timeout,
    /// Server asked us to slow down (e.g. 429, 503).
    Throttled,
    /// Network-level failure (connection reset, DNS, etc.).
    Connection,
    /// HTTP status that is retryable but not strictly throttling (5xx).
    Http5xx(u16),
    /// Server denied the request for good (403). Never retried.
    PermanentRejection,
    /// Anything else; retried while the schedule lasts.
    Other,
}

/// Decision returned by the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Ordered list of delays between attempts. Attempt `n` (1-based) that
/// fails waits `delays[n - 1]`; once the list is exhausted we give up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::from_millis(&DEFAULT_RETRY_DELAYS_MS)
    }
}

impl RetrySchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_millis(delays_ms: &[u64]) -> Self {
        Self {
            delays: delays_ms.iter().map(|ms| Duration::from_millis(*ms)).collect(),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Delay after failed attempt `attempt` (1-based), or `None` when exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        let idx = attempt.checked_sub(1)? as usize;
        self.delays.get(idx).copied()
    }

    /// Combine the error kind with the schedule.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if kind == ErrorKind::PermanentRejection {
            return RetryDecision::NoRetry;
        }
        match self.delay_for(attempt) {
            Some(d) => RetryDecision::RetryAfter(d),
            None => RetryDecision::NoRetry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_matches_upload_defaults() {
        let s = RetrySchedule::default();
        assert_eq!(s.delays().len(), 9);
        assert_eq!(s.delay_for(1), Some(Duration::from_secs(3)));
        assert_eq!(s.delay_for(9), Some(Duration::from_secs(60)));
        assert_eq!(s.delay_for(10), None);
        assert_eq!(s.delay_for(0), None);
    }

    #[test]
    fn permanent_rejection_never_retries() {
        let s = RetrySchedule::default();
        assert_eq!(s.decide(1, ErrorKind::PermanentRejection), RetryDecision::NoRetry);
    }

    #[test]
    fn schedule_exhaustion_stops_retries() {
        let s = RetrySchedule::from_millis(&[10, 20]);
        assert_eq!(
            s.decide(1, ErrorKind::Connection),
            RetryDecision::RetryAfter(Duration::from_millis(10))
        );
        assert_eq!(
            s.decide(2, ErrorKind::Other),
            RetryDecision::RetryAfter(Duration::from_millis(20))
        );
        assert_eq!(s.decide(3, ErrorKind::Throttled), RetryDecision::NoRetry);
        assert_eq!(RetrySchedule::none().decide(1, ErrorKind::Timeout), RetryDecision::NoRetry);
    }
}
