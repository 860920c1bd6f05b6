//! A single fixed window shared by many clients.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use super::algorithm::{require_nonzero, require_positive, whole_periods, KeyedAlgorithm};
use super::clock::{Clock, SystemClock};
use super::fixed_window::WindowAlignment;
use crate::error::Result;

#[derive(Debug, Default)]
struct KeyedWindowState {
    window_index: u64,
    counts: HashMap<String, u64>,
}

/// Fixed window counting for every client in one structure.
///
/// Each client may be admitted `limit` times per window. All counts are
/// dropped together when the window rolls over, so memory only holds the
/// clients seen in the current window.
pub struct KeyedFixedWindow {
    limit: u64,
    window_size: Duration,
    anchor: Instant,
    state: Mutex<KeyedWindowState>,
    clock: Arc<dyn Clock>,
}

impl KeyedFixedWindow {
    /// Create a new shared window whose first window starts now.
    pub fn new(limit: u64, window_size: Duration) -> Result<Self> {
        Self::with_options(
            limit,
            window_size,
            WindowAlignment::Construction,
            Arc::new(SystemClock),
        )
    }

    /// Create a new shared window with an explicit alignment and clock.
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
            anchor,
            state: Mutex::new(KeyedWindowState::default()),
            clock,
        })
    }

    /// Get the per-client limit.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Get the admits recorded for `client_id` in the current window.
    pub fn count(&self, client_id: &str) -> u64 {
        let mut state = self.state.lock();
        self.roll_window(&mut state);
        state.counts.get(client_id).copied().unwrap_or(0)
    }

    /// Get the number of clients tracked in the current window.
    pub fn client_count(&self) -> usize {
        let mut state = self.state.lock();
        self.roll_window(&mut state);
        state.counts.len()
    }

    fn roll_window(&self, state: &mut KeyedWindowState) {
        let elapsed = self.clock.now().saturating_duration_since(self.anchor);
        let index = whole_periods(elapsed, self.window_size);
        if index != state.window_index {
            trace!(
                clients = state.counts.len(),
                current = index,
                "Shared window rolled over"
            );
            state.window_index = index;
            state.counts.clear();
        }
    }
}

impl KeyedAlgorithm for KeyedFixedWindow {
    fn allow(&self, client_id: &str) -> bool {
        let mut state = self.state.lock();
        self.roll_window(&mut state);

        if let Some(count) = state.counts.get_mut(client_id) {
            if *count >= self.limit {
                return false;
            }
            *count += 1;
            return true;
        }

        state.counts.insert(client_id.to_string(), 1);
        true
    }
}

impl std::fmt::Debug for KeyedFixedWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedFixedWindow")
            .field("limit", &self.limit)
            .field("window_size", &self.window_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn manual_window(limit: u64, window_ms: u64) -> (Arc<ManualClock>, KeyedFixedWindow) {
        let clock = Arc::new(ManualClock::new());
        let window = KeyedFixedWindow::with_options(
            limit,
            Duration::from_millis(window_ms),
            WindowAlignment::Construction,
            clock.clone(),
        )
        .unwrap();
        (clock, window)
    }

    #[test]
    fn test_clients_have_separate_counts() {
        let (_, window) = manual_window(2, 1000);

        assert!(window.allow("client_a"));
        assert!(window.allow("client_a"));
        assert!(!window.allow("client_a"));

        assert!(window.allow("client_b"));
        assert_eq!(window.count("client_a"), 2);
        assert_eq!(window.count("client_b"), 1);
        assert_eq!(window.count("client_c"), 0);
    }

    #[test]
    fn test_rollover_clears_every_client() {
        let (clock, window) = manual_window(3, 1000);
        for _ in 0..5 {
            window.allow("client");
        }
        window.allow("other");
        assert_eq!(window.client_count(), 2);

        clock.advance(Duration::from_secs(1));
        assert_eq!(window.client_count(), 0);
        assert!(window.allow("client"));
    }

    #[test]
    fn test_accepts_then_denies_then_resets() {
        // 7 requests spaced 200ms apart against 3 per second: a reset at 1s
        let (clock, window) = manual_window(3, 1000);
        let mut allowed = 0;
        let mut denied = 0;

        for _ in 0..7 {
            if window.allow("client") {
                allowed += 1;
            } else {
                denied += 1;
            }
            clock.advance(Duration::from_millis(200));
        }

        assert_eq!(allowed, 5);
        assert_eq!(denied, 2);
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        assert!(KeyedFixedWindow::new(0, Duration::from_secs(1)).is_err());
        assert!(KeyedFixedWindow::new(1, Duration::ZERO).is_err());
    }

    #[test]
    fn test_epoch_aligned_rollover() {
        // Created 400ms into a 1s window
        let clock = Arc::new(ManualClock::starting_at(Duration::from_millis(7_400)));
        let window = KeyedFixedWindow::with_options(
            1,
            Duration::from_secs(1),
            WindowAlignment::Epoch,
            clock.clone(),
        )
        .unwrap();

        assert!(window.allow("client"));
        assert!(window.allow("other"));

        clock.advance(Duration::from_millis(599));
        assert!(!window.allow("client"));
        assert_eq!(window.client_count(), 2);

        clock.advance(Duration::from_millis(1));
        assert_eq!(window.count("client"), 0);
        assert!(window.allow("client"));
    }

    #[test]
    fn test_concurrent_allow_never_exceeds_limit_per_client() {
        let limit = 5;
        let window = KeyedFixedWindow::new(limit, Duration::from_secs(3600)).unwrap();
        let allowed_a = AtomicU64::new(0);
        let allowed_b = AtomicU64::new(0);

        std::thread::scope(|s| {
            for i in 0..16 {
                let (client, allowed) = if i % 2 == 0 {
                    ("client_a", &allowed_a)
                } else {
                    ("client_b", &allowed_b)
                };
                let window = &window;
                s.spawn(move || {
                    for _ in 0..3 {
                        if window.allow(client) {
                            allowed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(allowed_a.load(Ordering::SeqCst), limit);
        assert_eq!(allowed_b.load(Ordering::SeqCst), limit);
    }
}
