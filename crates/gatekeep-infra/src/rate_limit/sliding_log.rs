//! Sliding window log rate limiter built from individual store commands.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use gatekeep_core::RateLimitError;
use gatekeep_core::domain::{DEFAULT_KEY_PREFIX, LimitPolicy, RateLimitKey};
use gatekeep_core::ports::{Decision, FailurePolicy, RateLimiter, SharedStore};

use super::now_millis;

/// Sliding window over a log of request timestamps.
///
/// Each check prunes entries older than the window, counts what is left,
/// and logs the new request when the count is under the limit. These are
/// separate round trips: two callers for the same key can both read a count
/// below the limit before either inserts, and both get admitted. Under
/// concurrency this limiter can therefore admit more than `limit` requests
/// per window. Use [`AtomicSlidingLogRateLimiter`](super::AtomicSlidingLogRateLimiter)
/// when that matters more than the extra script execution cost.
///
/// Store failures reject the request by default.
pub struct SlidingLogRateLimiter {
    store: Arc<dyn SharedStore>,
    policy: LimitPolicy,
    key_prefix: String,
    failure_policy: FailurePolicy,
}

impl SlidingLogRateLimiter {
    pub fn new(store: Arc<dyn SharedStore>, policy: LimitPolicy) -> Self {
        Self {
            store,
            policy,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            failure_policy: FailurePolicy::FailClosed,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    async fn try_check(&self, key: &RateLimitKey) -> Result<Decision, RateLimitError> {
        let storage_key = key.storage_key(&self.key_prefix);
        let now = now_millis();
        let window_start = now - self.policy.window_millis();

        self.store
            .sorted_remove_by_score(&storage_key, 0, window_start)
            .await?;

        let count = self.store.sorted_len(&storage_key).await?;
        let count = u64::try_from(count).map_err(|_| {
            RateLimitError::InvalidState(format!("log {storage_key} has cardinality {count}"))
        })?;

        let limit = u64::from(self.policy.limit());
        if count >= limit {
            tracing::warn!(key = %key, count, limit, "Rate limit exceeded");
            return Ok(Decision::Rejected {
                retry_after: self.policy.window(),
            });
        }

        // Suffix keeps requests logged in the same millisecond distinct.
        let member = format!("{}-{}", now, Uuid::new_v4());
        self.store.sorted_add(&storage_key, &member, now).await?;
        self.store
            .expire(&storage_key, self.policy.window())
            .await?;

        tracing::debug!(key = %key, count = count + 1, limit, "Request allowed");
        Ok(Decision::Admitted)
    }
}

#[async_trait]
impl RateLimiter for SlidingLogRateLimiter {
    async fn check(&self, key: &RateLimitKey) -> Decision {
        self.try_check(key)
            .await
            .unwrap_or_else(Decision::Indeterminate)
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }
}
