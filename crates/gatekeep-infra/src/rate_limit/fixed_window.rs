//! Fixed window counter rate limiter.

use std::sync::Arc;

use async_trait::async_trait;

use gatekeep_core::RateLimitError;
use gatekeep_core::domain::{DEFAULT_KEY_PREFIX, LimitPolicy, RateLimitKey};
use gatekeep_core::ports::{AtomicOp, Decision, FailurePolicy, RateLimiter, ScriptArg, SharedStore};

/// One counter per key per window.
///
/// The counter's TTL is set only when it goes from 0 to 1, so each window is
/// anchored to the first request of its epoch and is not extended by later
/// requests. A caller can spend `limit` just before the counter expires and
/// `limit` again right after, so bursts of up to twice the limit are possible
/// around window boundaries.
///
/// Increment and expiry run as one [`AtomicOp::FixedWindowIncr`], so a
/// counter never exists without its expiry.
pub struct FixedWindowRateLimiter {
    store: Arc<dyn SharedStore>,
    policy: LimitPolicy,
    key_prefix: String,
    failure_policy: FailurePolicy,
}

impl FixedWindowRateLimiter {
    pub fn new(store: Arc<dyn SharedStore>, policy: LimitPolicy) -> Self {
        Self {
            store,
            policy,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            failure_policy: FailurePolicy::Propagate,
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
        let args = [ScriptArg::Int(self.policy.window_millis())];

        let count = self
            .store
            .execute_atomic(AtomicOp::FixedWindowIncr, &keys, &args)
            .await?;
        if count < 1 {
            return Err(RateLimitError::InvalidState(format!(
                "counter {} incremented to {count}",
                keys[0]
            )));
        }

        if count <= i64::from(self.policy.limit()) {
            tracing::debug!(key = %key, count, limit = self.policy.limit(), "Request allowed");
            Ok(Decision::Admitted)
        } else {
            tracing::debug!(key = %key, count, limit = self.policy.limit(), "Rate limit exceeded");
            Ok(Decision::Rejected {
                retry_after: self.policy.window(),
            })
        }
    }
}

#[async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn check(&self, key: &RateLimitKey) -> Decision {
        self.try_check(key)
            .await
            .unwrap_or_else(Decision::Indeterminate)
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }
}
