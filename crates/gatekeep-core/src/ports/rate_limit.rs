//! Rate limiting port.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::RateLimitKey;
use crate::error::RateLimitError;

/// Rate limiter trait - abstraction over admission strategies.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record the request and report the raw outcome, store failures included.
    async fn check(&self, key: &RateLimitKey) -> Decision;

    /// How this instance resolves an indeterminate outcome.
    fn failure_policy(&self) -> FailurePolicy;

    /// Check the key and resolve the outcome through the failure policy.
    async fn evaluate(&self, key: &RateLimitKey) -> Result<Verdict, RateLimitError> {
        let decision = self.check(key).await;
        self.failure_policy().resolve(key, decision)
    }

    /// Returns Ok(true) if the request is admitted, Ok(false) if rate limited.
    async fn is_allowed(&self, key: &str) -> Result<bool, RateLimitError> {
        let key = RateLimitKey::new(key);
        Ok(self.evaluate(&key).await?.is_admitted())
    }
}

/// Outcome of a single admission check.
#[derive(Debug)]
pub enum Decision {
    /// The request counts against the quota and may proceed.
    Admitted,
    /// The quota is exhausted; `retry_after` is a hint for the caller.
    Rejected { retry_after: Duration },
    /// No decision could be made.
    Indeterminate(RateLimitError),
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted)
    }
}

/// Final admit/reject answer after the failure policy has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    /// `retry_after` is `None` when the rejection came from a store failure.
    Reject { retry_after: Option<Duration> },
}

impl Verdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admit)
    }
}

/// What to do when the store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Return the error to the caller.
    Propagate,
    /// Reject the request.
    FailClosed,
    /// Admit the request.
    FailOpen,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Propagate => "propagate",
            FailurePolicy::FailClosed => "fail-closed",
            FailurePolicy::FailOpen => "fail-open",
        }
    }

    /// Turn a decision into a verdict.
    ///
    /// Defects (see [`RateLimitError::is_defect`]) are returned as errors
    /// regardless of the policy.
    pub fn resolve(
        self,
        key: &RateLimitKey,
        decision: Decision,
    ) -> Result<Verdict, RateLimitError> {
        let err = match decision {
            Decision::Admitted => return Ok(Verdict::Admit),
            Decision::Rejected { retry_after } => {
                return Ok(Verdict::Reject {
                    retry_after: Some(retry_after),
                });
            }
            Decision::Indeterminate(err) => err,
        };

        if err.is_defect() {
            tracing::error!(key = %key, error = %err, "Rate limiter defect");
            return Err(err);
        }

        match self {
            FailurePolicy::Propagate => Err(err),
            FailurePolicy::FailClosed => {
                tracing::error!(key = %key, error = %err, "Rate limit check failed, rejecting request");
                Ok(Verdict::Reject { retry_after: None })
            }
            FailurePolicy::FailOpen => {
                tracing::error!(key = %key, error = %err, "Rate limit check failed, allowing request");
                Ok(Verdict::Admit)
            }
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "propagate" => Ok(FailurePolicy::Propagate),
            "fail-closed" | "closed" => Ok(FailurePolicy::FailClosed),
            "fail-open" | "open" => Ok(FailurePolicy::FailOpen),
            other => Err(RateLimitError::InvalidPolicy(format!(
                "unknown failure policy '{other}'"
            ))),
        }
    }
}
