use std::time::Duration;

/// Bounded retry budget for one collaborator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts,
            base_backoff,
        }
    }

    /// Backoff before retrying a failed attempt (0-based): base * 3^attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 3u32.pow(attempt)
    }
}

pub const SEARCH_RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(2));
pub const SCORING_RETRY: RetryPolicy = RetryPolicy::new(2, Duration::from_secs(1));
pub const FETCH_RETRY: RetryPolicy = RetryPolicy::new(2, Duration::from_secs(1));
