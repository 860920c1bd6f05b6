//! Token bucket algorithm with lazy, drift-free refill.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use super::algorithm::{require_nonzero, require_positive, span_of, whole_periods, Algorithm};
use super::clock::{Clock, SystemClock};
use crate::error::Result;

/// Mutable state of a bucket, guarded by a single lock.
#[derive(Debug)]
struct BucketState {
    /// Tokens currently available, always `<= capacity`
    tokens: u64,
    /// Boundary of the last applied refill
    last_refill_at: Instant,
}

/// A capacity-bounded token bucket.
///
/// Each admitted request consumes one token. Tokens are refilled on demand:
/// every call credits `refill_tokens` for each whole `refill_interval` that
/// has elapsed since the last refill boundary. The boundary advances by
/// whole intervals only, so partial progress toward the next interval is
/// never lost or double-counted, however irregular the calls are.
pub struct TokenBucket {
    capacity: u64,
    refill_tokens: u64,
    refill_interval: Duration,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Create a new, full token bucket using the system clock.
    pub fn new(capacity: u64, refill_tokens: u64, refill_interval: Duration) -> Result<Self> {
        Self::with_clock(capacity, refill_tokens, refill_interval, Arc::new(SystemClock))
    }

    /// Create a new, full token bucket reading time from `clock`.
    pub fn with_clock(
        capacity: u64,
        refill_tokens: u64,
        refill_interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        require_positive("capacity", capacity)?;
        require_positive("refill_tokens", refill_tokens)?;
        require_nonzero("refill_interval", refill_interval)?;

        let now = clock.now();
        Ok(Self {
            capacity,
            refill_tokens,
            refill_interval,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill_at: now,
            }),
            clock,
        })
    }

    /// Get the current number of tokens, after applying any pending refill.
    pub fn tokens(&self) -> u64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    /// Get the bucket capacity.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Get the number of tokens granted per interval.
    pub fn refill_tokens(&self) -> u64 {
        self.refill_tokens
    }

    /// Get the refill interval.
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// Credit tokens for every whole interval elapsed since the last boundary.
    fn refill(&self, state: &mut BucketState) {
        let elapsed = self.clock.now().saturating_duration_since(state.last_refill_at);
        let intervals = whole_periods(elapsed, self.refill_interval);
        if intervals == 0 {
            return;
        }

        let granted = intervals.saturating_mul(self.refill_tokens);
        state.tokens = state.tokens.saturating_add(granted).min(self.capacity);
        state.last_refill_at += span_of(self.refill_interval, intervals);
    }
}

impl Algorithm for TokenBucket {
    fn allow(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);

        if state.tokens > 0 {
            state.tokens -= 1;
            trace!(tokens = state.tokens, "Token consumed");
            true
        } else {
            trace!("Token bucket empty");
            false
        }
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("refill_tokens", &self.refill_tokens)
            .field("refill_interval", &self.refill_interval)
            .field("state", &*self.state.lock())
            .finish()
    }
}
