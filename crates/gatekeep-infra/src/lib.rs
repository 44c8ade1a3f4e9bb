//! # Gatekeep Infrastructure
//!
//! Concrete implementations of the ports defined in `gatekeep-core`:
//! shared store adapters and the rate limiting algorithms built on them.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external dependencies, in-memory store only
//! - `redis` - Redis shared store

pub mod rate_limit;
pub mod store;

// Re-exports - Rate limiters
pub use rate_limit::{
    AtomicSlidingLogRateLimiter, FixedWindowRateLimiter, SlidingLogRateLimiter,
    TokenBucketRateLimiter,
};

// Re-exports - Stores
pub use store::InMemoryStore;
#[cfg(feature = "redis")]
pub use store::{RedisConfig, RedisStore};
