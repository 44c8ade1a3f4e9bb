use std::fmt;

/// Prefix under which every rate limit record is stored.
pub const DEFAULT_KEY_PREFIX: &str = "rate_limit";

/// The subject being rate limited (client address, account id, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn new(subject: impl Into<String>) -> Self {
        Self(subject.into())
    }

    /// Store key for this subject, e.g. `rate_limit:10.0.0.1`.
    pub fn storage_key(&self, prefix: &str) -> String {
        format!("{}:{}", prefix, self.0)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
