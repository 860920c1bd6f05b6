//! Fixed window counter with lazy window resets.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::algorithm::{require_nonzero, require_positive, span_of, whole_periods, Algorithm};
use super::clock::{Clock, SystemClock};
use crate::error::Result;

/// Where window boundaries fall.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowAlignment {
    /// The first window starts when the counter is created
    #[default]
    Construction,
    /// Windows start at multiples of the window size since the Unix epoch
    Epoch,
}

impl WindowAlignment {
    /// Instant at which window 0 starts.
    pub(crate) fn anchor(self, clock: &dyn Clock, window_size: Duration) -> Instant {
        let now = clock.now();
        match self {
            WindowAlignment::Construction => now,
            WindowAlignment::Epoch => {
                let since_epoch = clock.since_epoch();
                let boundaries = whole_periods(since_epoch, window_size);
                let into_window = since_epoch - span_of(window_size, boundaries);
                // Fall back to construction time if the monotonic clock cannot go back that far
                now.checked_sub(into_window).unwrap_or(now)
            }
        }
    }
}

#[derive(Debug)]
struct WindowState {
    /// Admits in the current window
    count: u64,
    /// Index of the window `count` belongs to
    window_index: u64,
}

/// A counter admitting at most `limit` requests per fixed window.
///
/// The window is evaluated on each call: when a call lands in a later window
/// than the previous one, the count starts again from zero. There is no
/// background reset task.
pub struct FixedWindowCounter {
    limit: u64,
    window_size: Duration,
    alignment: WindowAlignment,
    anchor: Instant,
    state: Mutex<WindowState>,
    clock: Arc<dyn Clock>,
}

impl FixedWindowCounter {
    /// Create a new counter whose first window starts now.
    pub fn new(limit: u64, window_size: Duration) -> Result<Self> {
        Self::with_options(
            limit,
            window_size,
            WindowAlignment::Construction,
            Arc::new(SystemClock),
        )
    }

    /// Create a new counter with an explicit alignment and clock.
    pub fn with_options(
        limit: u64,
        window_size: Duration,
        alignment: WindowAlignment,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        require_positive("limit", limit)?;
        require_nonzero("window_size", window_size)?;

        let anchor = alignment.anchor(clock.as_ref(), window_size);
        Ok(Self {
            limit,
            window_size,
            alignment,
            anchor,
            state: Mutex::new(WindowState {
                count: 0,
                window_index: 0,
            }),
            clock,
        })
    }

    /// Get the limit for this counter.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Get the window size.
    pub fn window_size(&self) -> Duration {
        self.window_size
    }

    /// Get the window alignment policy.
    pub fn alignment(&self) -> WindowAlignment {
        self.alignment
    }

    /// Get the number of admits in the current window.
    pub fn count(&self) -> u64 {
        let mut state = self.state.lock();
        self.roll_window(&mut state);
        state.count
    }

    /// Get the remaining quota in the current window.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count())
    }

    /// Get the duration until the current window ends.
    pub fn duration_until_reset(&self) -> Duration {
        let elapsed = self.clock.now().saturating_duration_since(self.anchor);
        let index = whole_periods(elapsed, self.window_size);
        let window_end = span_of(self.window_size, index.saturating_add(1));
        window_end.saturating_sub(elapsed)
    }

    fn current_index(&self) -> u64 {
        let elapsed = self.clock.now().saturating_duration_since(self.anchor);
        whole_periods(elapsed, self.window_size)
    }

    /// Start a fresh count if time has moved into a later window.
    fn roll_window(&self, state: &mut WindowState) {
        let index = self.current_index();
        if index != state.window_index {
            trace!(
                previous = state.window_index,
                current = index,
                "Fixed window rolled over"
            );
            state.window_index = index;
            state.count = 0;
        }
    }
}

impl Algorithm for FixedWindowCounter {
    fn allow(&self) -> bool {
        let mut state = self.state.lock();
        self.roll_window(&mut state);

        if state.count < self.limit {
            state.count += 1;
            trace!(count = state.count, limit = self.limit, "Request counted");
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for FixedWindowCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowCounter")
            .field("limit", &self.limit)
            .field("window_size", &self.window_size)
            .field("alignment", &self.alignment)
            .field("state", &*self.state.lock())
            .finish()
    }
}
