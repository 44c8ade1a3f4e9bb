//! Application state - shared across all handlers.

use std::sync::Arc;

use gatekeep_core::RateLimitError;
use gatekeep_core::domain::{LimitPolicy, TokenBucketPolicy};
use gatekeep_core::ports::{RateLimiter, SharedStore};
use gatekeep_infra::{
    AtomicSlidingLogRateLimiter, FixedWindowRateLimiter, InMemoryStore, RedisConfig, RedisStore,
    SlidingLogRateLimiter, TokenBucketRateLimiter,
};

use crate::config::{AppConfig, RateLimitSettings, Strategy};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<dyn RateLimiter>,
    pub strategy: Strategy,
    /// "redis" or "memory"
    pub store_backend: &'static str,
}

impl AppState {
    /// Connect the store and build the configured limiter.
    pub async fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let (store, store_backend) = connect_store(config.redis.as_ref()).await?;
        let limiter = build_limiter(&config.rate_limit, store)?;

        tracing::info!(
            strategy = %config.rate_limit.strategy,
            store = store_backend,
            failure_policy = %limiter.failure_policy(),
            "Application state initialized"
        );

        Ok(Self {
            limiter,
            strategy: config.rate_limit.strategy,
            store_backend,
        })
    }
}

async fn connect_store(
    redis: Option<&RedisConfig>,
) -> anyhow::Result<(Arc<dyn SharedStore>, &'static str)> {
    let Some(config) = redis else {
        tracing::warn!("REDIS_URL not set. Rate limits are enforced per process (in-memory mode).");
        return Ok((Arc::new(InMemoryStore::new()), "memory"));
    };

    match RedisStore::new(config.clone()).await {
        Ok(store) => Ok((Arc::new(store), "redis")),
        Err(e) if config.fallback_to_memory => {
            tracing::error!(
                "Failed to connect to Redis: {}. Using in-memory fallback.",
                e
            );
            Ok((Arc::new(InMemoryStore::new()), "memory"))
        }
        Err(e) => Err(e.into()),
    }
}

/// Build the limiter selected by `settings` on top of `store`.
pub fn build_limiter(
    settings: &RateLimitSettings,
    store: Arc<dyn SharedStore>,
) -> Result<Arc<dyn RateLimiter>, RateLimitError> {
    let prefix = settings.key_prefix.as_str();
    let override_policy = settings.failure_policy;

    let limiter: Arc<dyn RateLimiter> = match settings.strategy {
        Strategy::FixedWindow => {
            let policy = LimitPolicy::new(settings.max_requests, settings.window)?;
            let limiter = FixedWindowRateLimiter::new(store, policy).with_key_prefix(prefix);
            Arc::new(match override_policy {
                Some(p) => limiter.with_failure_policy(p),
                None => limiter,
            })
        }
        Strategy::SlidingLog => {
            let policy = LimitPolicy::new(settings.max_requests, settings.window)?;
            let limiter = SlidingLogRateLimiter::new(store, policy).with_key_prefix(prefix);
            Arc::new(match override_policy {
                Some(p) => limiter.with_failure_policy(p),
                None => limiter,
            })
        }
        Strategy::SlidingLogAtomic => {
            let policy = LimitPolicy::new(settings.max_requests, settings.window)?;
            let limiter = AtomicSlidingLogRateLimiter::new(store, policy).with_key_prefix(prefix);
            Arc::new(match override_policy {
                Some(p) => limiter.with_failure_policy(p),
                None => limiter,
            })
        }
        Strategy::TokenBucket => {
            let policy = TokenBucketPolicy::new(settings.max_requests, settings.refill_per_sec)?;
            let limiter = TokenBucketRateLimiter::new(store, policy).with_key_prefix(prefix);
            Arc::new(match override_policy {
                Some(p) => limiter.with_failure_policy(p),
                None => limiter,
            })
        }
    };

    Ok(limiter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeep_core::ports::FailurePolicy;
    use std::time::Duration;

    fn settings(strategy: Strategy) -> RateLimitSettings {
        RateLimitSettings {
            strategy,
            max_requests: 2,
            window: Duration::from_secs(1),
            ..RateLimitSettings::default()
        }
    }

    #[test]
    fn test_default_failure_policy_per_strategy() {
        let cases = [
            (Strategy::FixedWindow, FailurePolicy::Propagate),
            (Strategy::SlidingLog, FailurePolicy::FailClosed),
            (Strategy::SlidingLogAtomic, FailurePolicy::FailOpen),
            (Strategy::TokenBucket, FailurePolicy::FailOpen),
        ];

        for (strategy, expected) in cases {
            let limiter = build_limiter(&settings(strategy), Arc::new(InMemoryStore::new())).unwrap();
            assert_eq!(limiter.failure_policy(), expected, "{strategy}");
        }
    }

    #[test]
    fn test_failure_policy_override() {
        let settings = RateLimitSettings {
            failure_policy: Some(FailurePolicy::FailClosed),
            ..settings(Strategy::SlidingLogAtomic)
        };
        let limiter = build_limiter(&settings, Arc::new(InMemoryStore::new())).unwrap();
        assert_eq!(limiter.failure_policy(), FailurePolicy::FailClosed);
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let settings = RateLimitSettings {
            max_requests: 0,
            ..settings(Strategy::FixedWindow)
        };
        let result = build_limiter(&settings, Arc::new(InMemoryStore::new()));
        assert!(matches!(result, Err(RateLimitError::InvalidPolicy(_))));
    }

    #[actix_web::test]
    async fn test_memory_store_without_redis_url() {
        let (_, backend) = connect_store(None).await.unwrap();
        assert_eq!(backend, "memory");
    }
}
