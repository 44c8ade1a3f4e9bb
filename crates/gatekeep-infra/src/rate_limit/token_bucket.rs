//! Token bucket rate limiter.

use std::sync::Arc;

use async_trait::async_trait;

use gatekeep_core::RateLimitError;
use gatekeep_core::domain::{DEFAULT_KEY_PREFIX, RateLimitKey, TokenBucketPolicy};
use gatekeep_core::ports::{AtomicOp, Decision, FailurePolicy, RateLimiter, ScriptArg, SharedStore};

use super::now_millis;

/// Each key owns a bucket of `capacity` tokens that refills continuously at
/// `refill_per_sec`. A request takes one token or is rejected.
///
/// A new bucket starts full, so a key may burst up to `capacity` requests.
/// Refill and take run as one [`AtomicOp::TokenBucketTake`]; the bucket
/// expires once it would have refilled completely.
pub struct TokenBucketRateLimiter {
    store: Arc<dyn SharedStore>,
    policy: TokenBucketPolicy,
    key_prefix: String,
    failure_policy: FailurePolicy,
}

impl TokenBucketRateLimiter {
    pub fn new(store: Arc<dyn SharedStore>, policy: TokenBucketPolicy) -> Self {
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
        let ttl = i64::try_from(self.policy.refill_time().as_millis()).unwrap_or(i64::MAX);
        let args = [
            ScriptArg::from(self.policy.capacity()),
            ScriptArg::from(self.policy.refill_per_sec()),
            ScriptArg::Int(now_millis()),
            ScriptArg::Int(ttl),
        ];

        let result = self
            .store
            .execute_atomic(AtomicOp::TokenBucketTake, &keys, &args)
            .await?;

        match result {
            1 => {
                tracing::debug!(key = %key, capacity = self.policy.capacity(), "Token taken");
                Ok(Decision::Admitted)
            }
            0 => {
                tracing::debug!(key = %key, capacity = self.policy.capacity(), "Bucket empty");
                Ok(Decision::Rejected {
                    retry_after: self.policy.token_interval(),
                })
            }
            other => Err(RateLimitError::InvalidState(format!(
                "{} returned {other}",
                AtomicOp::TokenBucketTake
            ))),
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucketRateLimiter {
    async fn check(&self, key: &RateLimitKey) -> Decision {
        self.try_check(key)
            .await
            .unwrap_or_else(Decision::Indeterminate)
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }
}
