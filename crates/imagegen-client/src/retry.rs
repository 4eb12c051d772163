use std::time::Duration;

use crate::errors::ClientError;

const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);

/// When and how long the REST client waits before re-sending a GET.
///
/// Streaming requests and POSTs are never retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first request.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub initial_backoff: Duration,
    /// Growth of the wait per retry.
    pub multiplier: f64,
    /// Upper bound for any single wait.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            multiplier: DEFAULT_MULTIPLIER,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Never retries.
    pub fn none() -> Self {
        Self::default().with_max_retries(0)
    }

    /// `max_retries` retries starting at `initial_backoff_ms`, growing by
    /// `multiplier`. Zero or negative inputs fall back to the defaults.
    pub fn exponential(max_retries: u32, initial_backoff_ms: u64, multiplier: f64) -> Self {
        let initial_backoff = match initial_backoff_ms {
            0 => DEFAULT_INITIAL_BACKOFF,
            ms => Duration::from_millis(ms),
        };
        Self {
            max_retries,
            initial_backoff,
            multiplier: if multiplier > 0.0 {
                multiplier
            } else {
                DEFAULT_MULTIPLIER
            },
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff.max(Duration::from_millis(1));
        self
    }

    /// Whether another attempt fits in the budget.
    pub fn can_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }

    /// Whether a GET that failed with `err` after `retries_done` retries
    /// should be sent again.
    pub fn should_retry(&self, err: &ClientError, retries_done: u32) -> bool {
        err.is_retryable() && self.can_retry(retries_done)
    }

    /// Wait before retry number `retries_done + 1`.
    pub fn backoff_duration(&self, retries_done: u32) -> Duration {
        if self.max_retries == 0 {
            return Duration::ZERO;
        }
        let scale = self.multiplier.powi(retries_done.min(i32::MAX as u32) as i32);
        let wait = self.initial_backoff.as_secs_f64() * scale;
        if !wait.is_finite() || wait >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_policy_never_retries() {
        let p = RetryPolicy::none();
        assert!(!p.can_retry(0));
        assert_eq!(p.backoff_duration(0), Duration::ZERO);
    }

    #[test]
    fn default_policy_allows_two_retries() {
        let p = RetryPolicy::default();
        assert!(p.can_retry(1));
        assert!(!p.can_retry(2));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let p = RetryPolicy::exponential(3, 100, 2.0).with_max_backoff(Duration::from_millis(250));
        assert_eq!(p.backoff_duration(0).as_millis(), 100);
        assert_eq!(p.backoff_duration(1).as_millis(), 200);
        assert_eq!(p.backoff_duration(2), Duration::from_millis(250));
        assert_eq!(p.backoff_duration(500), Duration::from_millis(250));
    }

    #[test]
    fn only_server_side_failures_are_retried_within_budget() {
        let p = RetryPolicy::exponential(1, 10, 1.0);
        let unavailable = ClientError::Http {
            status: 503,
            detail: "busy".into(),
        };
        let missing = ClientError::Http {
            status: 404,
            detail: "Image not found".into(),
        };
        assert!(p.should_retry(&unavailable, 0));
        assert!(!p.should_retry(&unavailable, 1));
        assert!(p.should_retry(&ClientError::Transport("reset".into()), 0));
        assert!(!p.should_retry(&missing, 0));
        assert!(!p.should_retry(&ClientError::Decode("eof".into()), 0));
    }
}
