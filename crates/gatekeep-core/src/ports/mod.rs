//! Ports - trait definitions for external dependencies.
//! These are the "interfaces" that infrastructure must implement.

mod rate_limit;
mod store;

pub use rate_limit::{Decision, FailurePolicy, RateLimiter, Verdict};
pub use store::{AtomicOp, ScriptArg, SharedStore, StoreError};
