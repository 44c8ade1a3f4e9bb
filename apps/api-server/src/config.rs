//! Application configuration loaded from environment variables.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use gatekeep_core::domain::DEFAULT_KEY_PREFIX;
use gatekeep_core::ports::FailurePolicy;
use gatekeep_infra::RedisConfig;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// `None` when `REDIS_URL` is not set; the in-memory store is used then.
    pub redis: Option<RedisConfig>,
    pub rate_limit: RateLimitSettings,
}

/// Which admission algorithm guards the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    FixedWindow,
    SlidingLog,
    SlidingLogAtomic,
    TokenBucket,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::FixedWindow => "fixed-window",
            Strategy::SlidingLog => "sliding-log",
            Strategy::SlidingLogAtomic => "sliding-log-atomic",
            Strategy::TokenBucket => "token-bucket",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed-window" => Ok(Strategy::FixedWindow),
            "sliding-log" => Ok(Strategy::SlidingLog),
            "sliding-log-atomic" => Ok(Strategy::SlidingLogAtomic),
            "token-bucket" => Ok(Strategy::TokenBucket),
            other => Err(format!("unknown rate limit strategy '{other}'")),
        }
    }
}

/// Rate limiter settings.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub strategy: Strategy,
    /// Requests per window, or bucket capacity for the token bucket.
    pub max_requests: u32,
    pub window: Duration,
    pub refill_per_sec: u32,
    /// Overrides the strategy's default failure policy when set.
    pub failure_policy: Option<FailurePolicy>,
    pub key_prefix: String,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::TokenBucket,
            max_requests: 10,
            window: Duration::from_secs(60),
            refill_per_sec: 1,
            failure_policy: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl RateLimitSettings {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            strategy: parse_or(lookup, "RATE_LIMIT_STRATEGY", defaults.strategy),
            max_requests: parse_nonzero(lookup, "RATE_LIMIT_MAX_REQUESTS", defaults.max_requests),
            window: Duration::from_millis(parse_nonzero(
                lookup,
                "RATE_LIMIT_WINDOW_MS",
                defaults.window.as_millis() as u64,
            )),
            refill_per_sec: parse_nonzero(
                lookup,
                "RATE_LIMIT_REFILL_PER_SEC",
                defaults.refill_per_sec,
            ),
            failure_policy: lookup("RATE_LIMIT_FAILURE_POLICY").and_then(|raw| {
                raw.parse::<FailurePolicy>()
                    .map_err(|e| tracing::warn!(error = %e, "Ignoring RATE_LIMIT_FAILURE_POLICY"))
                    .ok()
            }),
            key_prefix: lookup("RATE_LIMIT_KEY_PREFIX").unwrap_or(defaults.key_prefix),
        }
    }
}

/// Parse an optional variable, warning and falling back to `default` on bad input.
fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            tracing::warn!(var = name, value = %raw, error = %e, "Invalid value, using default");
            default
        }),
        None => default,
    }
}

/// Like [`parse_or`], but zero also falls back to `default`.
fn parse_nonzero<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr + Default + PartialEq + Copy,
    T::Err: fmt::Display,
{
    let value = parse_or(lookup, name, default);
    if value == T::default() {
        tracing::warn!(var = name, "Value must be greater than zero, using default");
        return default;
    }
    value
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::from_lookup(&|name| env::var(name).ok());
        if config.redis.is_some() {
            config.redis = Some(RedisConfig::from_env());
        }
        config
    }

    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        Self {
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(lookup, "PORT", 8080),
            redis: lookup("REDIS_URL").map(|url| RedisConfig {
                url,
                ..RedisConfig::default()
            }),
            rate_limit: RateLimitSettings::from_lookup(lookup),
        }
    }
}
