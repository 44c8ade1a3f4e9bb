//! Rate limiting error types.

use thiserror::Error;

use crate::ports::StoreError;

/// Errors surfaced by a rate limiter.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The shared store failed or timed out.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The store returned something no correct limiter state can produce.
    #[error("Invalid limiter state: {0}")]
    InvalidState(String),

    /// A limit policy was rejected at construction time.
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),
}

impl RateLimitError {
    /// Defects are never resolved by a failure policy.
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            RateLimitError::InvalidState(_) | RateLimitError::InvalidPolicy(_)
        )
    }
}
