//! Domain types - rate limit subjects and policies.

mod key;
mod policy;

pub use key::{DEFAULT_KEY_PREFIX, RateLimitKey};
pub use policy::{LimitPolicy, TokenBucketPolicy};
