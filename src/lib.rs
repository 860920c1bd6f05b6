//! Turnstile - Per-key Request Admission
//!
//! This crate decides, per client key, whether a request should be admitted.
//! Each key owns a pluggable rate limiting algorithm (token bucket or fixed
//! window), and a registry forgets keys that have gone idle.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use error::{Result, TurnstileError};
