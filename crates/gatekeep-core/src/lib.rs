//! # Gatekeep Core
//!
//! Admission control contracts for Gatekeep.
//! This crate defines the shared store and rate limiter ports and the
//! policy types they are configured with. It has no infrastructure dependencies.

pub mod domain;
pub mod error;
pub mod ports;

pub use error::RateLimitError;
