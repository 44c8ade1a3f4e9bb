//! Sliding window log rate limiter executed as one atomic store operation.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use gatekeep_core::RateLimitError;
use gatekeep_core::domain::{DEFAULT_KEY_PREFIX, LimitPolicy, RateLimitKey};
use gatekeep_core::ports::{AtomicOp, Decision, FailurePolicy, RateLimiter, ScriptArg, SharedStore};

use super::now_millis;

/// Same log semantics as [`SlidingLogRateLimiter`](super::SlidingLogRateLimiter),
/// but prune, count, insert and expiry run as a single [`AtomicOp::SlidingLogAdmit`].
///
/// No other caller can touch the key's log between the count and the insert,
/// so at most `limit` requests are admitted in any window, across all
/// processes sharing the store.
///
/// Store and script failures admit the request by default.
pub struct AtomicSlidingLogRateLimiter {
    store: Arc<dyn SharedStore>,
    policy: LimitPolicy,
    key_prefix: String,
    failure_policy: FailurePolicy,
}

impl AtomicSlidingLogRateLimiter {
    pub fn new(store: Arc<dyn SharedStore>, policy: LimitPolicy) -> Self {
        Self {
            store,
            policy,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            failure_policy: FailurePolicy::FailOpen,
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
        let keys = [key.storage_key(&self.key_prefix)];
        let now = now_millis();
        let window = self.policy.window_millis();
        let args = [
            ScriptArg::Int(now),
            ScriptArg::Int(window),
            ScriptArg::from(self.policy.limit()),
            ScriptArg::Int(window),
            ScriptArg::Str(format!("{}-{}", now, Uuid::new_v4())),
        ];

        let result = self
            .store
            .execute_atomic(AtomicOp::SlidingLogAdmit, &keys, &args)
            .await?;

        match result {
            1 => {
                tracing::debug!(key = %key, limit = self.policy.limit(), "Request allowed");
                Ok(Decision::Admitted)
            }
            0 => {
                tracing::debug!(key = %key, limit = self.policy.limit(), "Rate limit exceeded");
                Ok(Decision::Rejected {
                    retry_after: self.policy.window(),
                })
            }
            other => Err(RateLimitError::InvalidState(format!(
                "{} returned {other}",
                AtomicOp::SlidingLogAdmit
            ))),
        }
    }
}

#[async_trait]
impl RateLimiter for AtomicSlidingLogRateLimiter {
    async fn check(&self, key: &RateLimitKey) -> Decision {
        self.try_check(key)
            .await
            .unwrap_or_else(Decision::Indeterminate)
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::time::Duration;

    fn limiter(
        store: Arc<InMemoryStore>,
        limit: u32,
        window: Duration,
    ) -> AtomicSlidingLogRateLimiter {
        AtomicSlidingLogRateLimiter::new(store, LimitPolicy::new(limit, window).unwrap())
    }

    #[tokio::test]
    async fn test_rejected_request_is_not_logged() {
        let store = Arc::new(InMemoryStore::new());
        let limiter = limiter(store.clone(), 2, Duration::from_secs(5));

        assert!(limiter.is_allowed("client").await.unwrap());
        assert!(limiter.is_allowed("client").await.unwrap());
        assert!(!limiter.is_allowed("client").await.unwrap());
        assert!(!limiter.is_allowed("client").await.unwrap());

        assert_eq!(store.sorted_len("rate_limit:client").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_fails_open_by_default() {
        let store = Arc::new(InMemoryStore::new());
        let limiter = limiter(store.clone(), 1, Duration::from_secs(5));
        assert_eq!(limiter.failure_policy(), FailurePolicy::FailOpen);

        assert!(limiter.is_allowed("client").await.unwrap());
        store.set_available(false);
        assert!(limiter.is_allowed("client").await.unwrap());

        let key = RateLimitKey::new("client");
        assert!(matches!(
            limiter.check(&key).await,
            Decision::Indeterminate(RateLimitError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported_as_store_error() {
        let store = Arc::new(InMemoryStore::new());
        store.increment("rate_limit:client").await.unwrap();

        let limiter = limiter(store, 1, Duration::from_secs(5))
            .with_failure_policy(FailurePolicy::Propagate);
        let err = limiter.is_allowed("client").await.unwrap_err();
        assert!(matches!(err, RateLimitError::Store(_)));
    }
}
