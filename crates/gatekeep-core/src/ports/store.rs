//! Shared store port.
//!
//! Every limiter keeps its state in an external key-value store that may be
//! shared by many processes. Implementations must make each individual
//! method atomic on the store side, and `execute_atomic` atomic as a whole.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

/// Multi-step operations that a store must execute indivisibly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicOp {
    /// Increment a window counter, setting its expiry when it is created.
    ///
    /// Keys: `[counter_key]`.
    /// Args: `[ttl_ms]`.
    /// Returns the post-increment count.
    FixedWindowIncr,

    /// Prune a request log, count it, and log a new entry if under the limit.
    ///
    /// Keys: `[log_key]`.
    /// Args: `[now_ms, window_ms, limit, ttl_ms, member]`.
    /// Returns `1` when the entry was added, `0` when the log was left as is.
    SlidingLogAdmit,

    /// Refill a token bucket and take one token if available.
    ///
    /// Keys: `[bucket_key]`.
    /// Args: `[capacity, refill_per_sec, now_ms, ttl_ms]`.
    /// Returns `1` when a token was taken, `0` otherwise.
    TokenBucketTake,
}

impl AtomicOp {
    pub fn name(&self) -> &'static str {
        match self {
            AtomicOp::FixedWindowIncr => "fixed_window_incr",
            AtomicOp::SlidingLogAdmit => "sliding_log_admit",
            AtomicOp::TokenBucketTake => "token_bucket_take",
        }
    }
}

impl fmt::Display for AtomicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Argument passed to an atomic operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptArg {
    Int(i64),
    Str(String),
}

impl From<i64> for ScriptArg {
    fn from(value: i64) -> Self {
        ScriptArg::Int(value)
    }
}

impl From<u32> for ScriptArg {
    fn from(value: u32) -> Self {
        ScriptArg::Int(i64::from(value))
    }
}

/// Shared store trait - abstraction over store backends (Redis, in-memory).
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Atomically increment an integer key, returning the post-increment value.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Set the time-to-live of a key. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Add a scored member to a sorted collection.
    async fn sorted_add(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError>;

    /// Remove members whose score lies in `min..=max`. Returns how many were removed.
    async fn sorted_remove_by_score(&self, key: &str, min: i64, max: i64)
    -> Result<u64, StoreError>;

    /// Number of members in a sorted collection (0 when the key is absent).
    async fn sorted_len(&self, key: &str) -> Result<i64, StoreError>;

    /// Run a multi-step operation as one indivisible unit.
    async fn execute_atomic(
        &self,
        op: AtomicOp,
        keys: &[String],
        args: &[ScriptArg],
    ) -> Result<i64, StoreError>;
}

/// Store operation errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Atomic operation failed: {0}")]
    Script(String),

    #[error("Wrong value type at key {0}")]
    WrongType(String),

    #[error("Operation failed: {0}")]
    Operation(String),
}
