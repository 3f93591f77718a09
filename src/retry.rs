use chrono::{DateTime, Duration, Utc};

const BASE_BACKOFF_SECS: i64 = 5;

/// Bounded retry for transient collaborator failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    pub max_backoff_secs: i64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, max_backoff_secs: i64) -> Self {
        Self {
            max_attempts,
            max_backoff_secs,
        }
    }

    /// Exponential backoff: 5s * 2^attempt, capped at `max_backoff_secs` when positive.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = BASE_BACKOFF_SECS * (1_i64 << attempt.min(10));
        let secs = if self.max_backoff_secs <= 0 {
            secs
        } else {
            secs.min(self.max_backoff_secs)
        };
        Duration::seconds(secs)
    }

    /// Delay before the next try, or `None` once `attempt` (0-based) was the last one.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt.saturating_add(1) >= self.max_attempts {
            None
        } else {
            Some(self.backoff(attempt))
        }
    }
}

/// How often and for how long to wait on a restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub budget: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, budget: Duration) -> Self {
        Self { interval, budget }
    }

    pub fn deadline_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.budget
    }

    /// Wait before the next poll; shortened so it never overshoots the deadline.
    pub fn wait_until_next(&self, now: DateTime<Utc>, deadline: DateTime<Utc>) -> Duration {
        let remaining = deadline - now;
        if remaining < self.interval {
            remaining.max(Duration::zero())
        } else {
            self.interval
        }
    }
}
