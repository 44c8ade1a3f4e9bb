//! Rate limiting strategies backed by a [`SharedStore`](gatekeep_core::ports::SharedStore).
//!
//! | Strategy | Store round trips | Same-key consistency | Default failure policy |
//! |---|---|---|---|
//! | [`FixedWindowRateLimiter`] | 1 | counter is atomic, window boundaries allow 2x bursts | propagate |
//! | [`SlidingLogRateLimiter`] | 4 | racy between count and insert | fail closed |
//! | [`AtomicSlidingLogRateLimiter`] | 1 | linearizable | fail open |
//! | [`TokenBucketRateLimiter`] | 1 | linearizable | fail open |

mod atomic_sliding_log;
mod fixed_window;
mod sliding_log;
mod token_bucket;


pub use atomic_sliding_log::AtomicSlidingLogRateLimiter;
pub use fixed_window::FixedWindowRateLimiter;
pub use sliding_log::SlidingLogRateLimiter;
pub use token_bucket::TokenBucketRateLimiter;

/// Wall clock in milliseconds since the Unix epoch.
///
/// Log scores and bucket timestamps are compared across processes, so this
/// must be wall time rather than a monotonic clock.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
