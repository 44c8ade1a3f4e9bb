use std::time::Duration;

use crate::error::RateLimitError;

/// Quota for the window based strategies: at most `limit` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    limit: u32,
    window: Duration,
}

impl LimitPolicy {
    /// Windows are tracked with millisecond precision.
    pub const MIN_WINDOW: Duration = Duration::from_millis(1);

    pub fn new(limit: u32, window: Duration) -> Result<Self, RateLimitError> {
        if limit == 0 {
            return Err(RateLimitError::InvalidPolicy(
                "limit must be at least 1".to_string(),
            ));
        }
        if window < Self::MIN_WINDOW {
            return Err(RateLimitError::InvalidPolicy(format!(
                "window must be at least {:?}, got {:?}",
                Self::MIN_WINDOW,
                window
            )));
        }
        Ok(Self { limit, window })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn window_millis(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Token bucket parameters: a bucket of `capacity` tokens refilled at
/// `refill_per_sec` tokens per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketPolicy {
    capacity: u32,
    refill_per_sec: u32,
}

impl TokenBucketPolicy {
    pub fn new(capacity: u32, refill_per_sec: u32) -> Result<Self, RateLimitError> {
        if capacity == 0 {
            return Err(RateLimitError::InvalidPolicy(
                "bucket capacity must be at least 1".to_string(),
            ));
        }
        if refill_per_sec == 0 {
            return Err(RateLimitError::InvalidPolicy(
                "refill rate must be at least 1 token per second".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            refill_per_sec,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_per_sec(&self) -> u32 {
        self.refill_per_sec
    }

    /// Time needed to accrue a single token.
    pub fn token_interval(&self) -> Duration {
        Duration::from_secs(1) / self.refill_per_sec
    }

    /// Time for an empty bucket to fill up again; used as the record TTL.
    pub fn refill_time(&self) -> Duration {
        let millis = (u64::from(self.capacity) * 1000).div_ceil(u64::from(self.refill_per_sec));
        Duration::from_millis(millis.max(1))
    }
}
