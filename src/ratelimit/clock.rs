//! Time sources for rate limiting algorithms.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A source of time for algorithms and the registry.
///
/// `now` must be monotonic. `since_epoch` is only consulted when a window
/// needs to be aligned to wall-clock boundaries.
pub trait Clock: Send + Sync {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Current wall-clock time as a duration since the Unix epoch.
    fn since_epoch(&self) -> Duration;
}

/// The process clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn since_epoch(&self) -> Duration {
        // A wall clock set before 1970 collapses to the epoch itself
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }
}

/// A clock that only moves when told to.
///
/// Both the monotonic and the wall-clock readings advance together. Only
/// compiled for this crate's tests and for downstream tests that enable the
/// `test-util` feature.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    epoch_origin: Duration,
    elapsed: parking_lot::Mutex<Duration>,
}

#[cfg(any(test, feature = "test-util"))]
impl ManualClock {
    /// Create a manual clock whose wall-clock reading starts at the epoch.
    pub fn new() -> Self {
        Self::starting_at(Duration::ZERO)
    }

    /// Create a manual clock whose wall-clock reading starts at `since_epoch`.
    pub fn starting_at(since_epoch: Duration) -> Self {
        Self {
            origin: Instant::now(),
            epoch_origin: since_epoch,
            elapsed: parking_lot::Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut elapsed = self.elapsed.lock();
        *elapsed += by;
    }

    /// Total time advanced since creation.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock()
    }

    fn since_epoch(&self) -> Duration {
        self.epoch_origin + *self.elapsed.lock()
    }
}
