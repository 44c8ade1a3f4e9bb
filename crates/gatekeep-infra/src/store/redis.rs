//! Redis shared store with per-command timeouts and Lua-backed atomic operations.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, RedisResult, Script};

use gatekeep_core::ports::{AtomicOp, ScriptArg, SharedStore, StoreError};

/// Count one request, starting the window on the first.
const FIXED_WINDOW_INCR: &str = r#"
local key = KEYS[1]
local ttl = tonumber(ARGV[1])

local current = redis.call('INCR', key)
if current == 1 then
    redis.call('PEXPIRE', key, ttl)
end
return current
"#;

/// Prune, count, and conditionally log one request.
const SLIDING_LOG_ADMIT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])
local member = ARGV[5]

redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
local count = redis.call('ZCARD', key)
if count >= limit then
    return 0
end

redis.call('ZADD', key, now, member)
redis.call('PEXPIRE', key, ttl)
return 1
"#;

/// Refill the bucket for the elapsed time and take one token if there is one.
const TOKEN_BUCKET_TAKE: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_per_sec = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local state = redis.call('HMGET', key, 'tokens', 'ts')
local tokens = tonumber(state[1])
local ts = tonumber(state[2])
if tokens == nil or ts == nil then
    tokens = capacity
    ts = now
end

local elapsed = math.max(0, now - ts)
tokens = math.min(capacity, tokens + elapsed * refill_per_sec / 1000)

local taken = 0
if tokens >= 1 then
    tokens = tokens - 1
    taken = 1
end

redis.call('HSET', key, 'tokens', tostring(tokens), 'ts', tostring(math.max(now, ts)))
redis.call('PEXPIRE', key, ttl)
return taken
"#;

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Upper bound on every command round trip
    pub command_timeout: Duration,
    /// Whether to fallback to the in-memory store if Redis is unavailable
    pub fallback_to_memory: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_millis(1000),
            fallback_to_memory: true,
        }
    }
}

impl RedisConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            connect_timeout: Duration::from_secs(
                std::env::var("REDIS_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            command_timeout: Duration::from_millis(
                std::env::var("REDIS_COMMAND_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            fallback_to_memory: std::env::var("REDIS_FALLBACK_TO_MEMORY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        }
    }
}

/// Redis-backed shared store.
///
/// Uses connection manager for automatic reconnection. The manager is
/// cloned per call; clones share one multiplexed connection, so no lock
/// is held across round trips.
pub struct RedisStore {
    conn: ConnectionManager,
    config: RedisConfig,
    fixed_window_incr: Script,
    sliding_log_admit: Script,
    token_bucket_take: Script,
}

impl RedisStore {
    pub async fn new(config: RedisConfig) -> Result<Self, StoreError> {
        let client =
            Client::open(config.url.as_str()).map_err(|e| StoreError::Connection(e.to_string()))?;

        // Use timeout to prevent hanging if Redis is unreachable
        let conn_manager_fut = ConnectionManager::new(client);
        let conn = tokio::time::timeout(config.connect_timeout, conn_manager_fut)
            .await
            .map_err(|_| StoreError::Connection("Connection timed out".to_string()))?
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::info!(url = %config.url, "Connected to Redis store");

        Ok(Self {
            conn,
            config,
            fixed_window_incr: Script::new(FIXED_WINDOW_INCR),
            sliding_log_admit: Script::new(SLIDING_LOG_ADMIT),
            token_bucket_take: Script::new(TOKEN_BUCKET_TAKE),
        })
    }

    /// Create from environment configuration.
    pub async fn from_env() -> Result<Self, StoreError> {
        Self::new(RedisConfig::from_env()).await
    }

    fn script(&self, op: AtomicOp) -> &Script {
        match op {
            AtomicOp::FixedWindowIncr => &self.fixed_window_incr,
            AtomicOp::SlidingLogAdmit => &self.sliding_log_admit,
            AtomicOp::TokenBucketTake => &self.token_bucket_take,
        }
    }

    /// Await one round trip, bounded by the configured command timeout.
    async fn run<T>(&self, fut: impl Future<Output = RedisResult<T>>) -> Result<T, StoreError> {
        tokio::time::timeout(self.config.command_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.config.command_timeout))?
            .map_err(|e| self.classify(e))
    }

    fn classify(&self, err: RedisError) -> StoreError {
        if err.is_timeout() {
            StoreError::Timeout(self.config.command_timeout)
        } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
            StoreError::Connection(err.to_string())
        } else if err.code() == Some("WRONGTYPE") {
            StoreError::WrongType(err.to_string())
        } else {
            StoreError::Operation(err.to_string())
        }
    }
}

fn millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        self.run(conn.incr(key, 1i64)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        self.run(conn.pexpire(key, millis(ttl))).await
    }

    async fn sorted_add(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _added: i64 = self.run(conn.zadd(key, member, score)).await?;
        Ok(())
    }

    async fn sorted_remove_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        self.run(conn.zrembyscore(key, min, max)).await
    }

    async fn sorted_len(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        self.run(conn.zcard(key)).await
    }

    async fn execute_atomic(
        &self,
        op: AtomicOp,
        keys: &[String],
        args: &[ScriptArg],
    ) -> Result<i64, StoreError> {
        let mut invocation = self.script(op).prepare_invoke();
        for key in keys {
            invocation.key(key.as_str());
        }
        for arg in args {
            match arg {
                ScriptArg::Int(n) => invocation.arg(*n),
                ScriptArg::Str(s) => invocation.arg(s.as_str()),
            };
        }

        let mut conn = self.conn.clone();
        self.run(invocation.invoke_async(&mut conn))
            .await
            .map_err(|e| match e {
                StoreError::Operation(msg) => StoreError::Script(format!("{op}: {msg}")),
                other => other,
            })
    }
}
