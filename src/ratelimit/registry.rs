//! Per-key registry of rate limiting algorithms with idle eviction.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use super::algorithm::{require_nonzero, Algorithm};
use super::clock::{Clock, SystemClock};
use crate::error::{Result, TurnstileError};

/// The registry's state for one key.
///
/// The algorithm stays private to the registry: a cloned record only
/// reports activity and can never be used to admit requests.
#[derive(Clone)]
pub struct Record {
    algorithm: Arc<dyn Algorithm>,
    last_active_at: Instant,
}

impl Record {
    /// When this key was last added or admitted against.
    pub fn last_active_at(&self) -> Instant {
        self.last_active_at
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("last_active_at", &self.last_active_at)
            .finish_non_exhaustive()
    }
}

/// State shared between the limiter handle and its cleanup task.
struct Registry {
    records: Mutex<HashMap<String, Record>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl Registry {
    fn is_expired(&self, record: &Record, now: Instant) -> bool {
        now.saturating_duration_since(record.last_active_at) > self.ttl
    }

    /// Refresh `key` and hand out its algorithm.
    ///
    /// An expired record is removed and treated as absent.
    fn touch(&self, key: &str) -> Option<Arc<dyn Algorithm>> {
        let mut records = self.records.lock();
        let now = self.clock.now();

        if self.is_expired(records.get(key)?, now) {
            records.remove(key);
            debug!(key = %key, "Dropped expired record on lookup");
            return None;
        }

        let record = records.get_mut(key)?;
        record.last_active_at = now;
        Some(Arc::clone(&record.algorithm))
    }

    fn sweep(&self) -> usize {
        let mut records = self.records.lock();
        let now = self.clock.now();
        let before = records.len();
        records.retain(|_, record| !self.is_expired(record, now));
        before - records.len()
    }
}

/// Registry mapping client keys to their rate limiting algorithm.
///
/// Every structural access to the map goes through one mutex. Admission
/// clones the key's algorithm handle under that mutex, releases it, and only
/// then enters the algorithm's own lock, so the two locks never nest.
///
/// A background task removes records idle for longer than the TTL. It is
/// stopped when the limiter is dropped.
pub struct RateLimiter {
    registry: Arc<Registry>,
    cleanup_interval: Duration,
    cleanup_task: JoinHandle<()>,
}

impl RateLimiter {
    /// Create a new rate limiter and start its cleanup task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(ttl: Duration, cleanup_interval: Duration) -> Result<Self> {
        Self::with_clock(ttl, cleanup_interval, Arc::new(SystemClock))
    }

    /// Create a new rate limiter reading activity timestamps from `clock`.
    pub fn with_clock(
        ttl: Duration,
        cleanup_interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        require_nonzero("ttl", ttl)?;
        require_nonzero("cleanup_interval", cleanup_interval)?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TurnstileError::Runtime(e.to_string()))?;

        let registry = Arc::new(Registry {
            records: Mutex::new(HashMap::new()),
            ttl,
            clock,
        });

        let cleanup_task = runtime.spawn(run_cleanup(Arc::downgrade(&registry), cleanup_interval));

        info!(
            ttl_ms = ttl.as_millis() as u64,
            cleanup_interval_ms = cleanup_interval.as_millis() as u64,
            "Rate limiter initialized"
        );

        Ok(Self {
            registry,
            cleanup_interval,
            cleanup_task,
        })
    }

    /// Check whether `key` has a live record.
    ///
    /// A record idle beyond the TTL reports `false` even before the cleanup
    /// task has removed it.
    pub fn exists(&self, key: &str) -> bool {
        let records = self.registry.records.lock();
        let now = self.registry.clock.now();
        records
            .get(key)
            .is_some_and(|record| !self.registry.is_expired(record, now))
    }

    /// Register `algorithm` for `key`, replacing any existing record.
    pub fn add<A>(&self, key: impl Into<String>, algorithm: A)
    where
        A: Algorithm + 'static,
    {
        self.insert(key.into(), Arc::new(algorithm));
    }

    /// Register a boxed algorithm for `key`, replacing any existing record.
    pub fn add_boxed(&self, key: impl Into<String>, algorithm: Box<dyn Algorithm>) {
        self.insert(key.into(), Arc::from(algorithm));
    }

    fn insert(&self, key: String, algorithm: Arc<dyn Algorithm>) {
        let mut records = self.registry.records.lock();
        let now = self.registry.clock.now();

        debug!(key = %key, "Adding rate limit record");
        records.insert(
            key,
            Record {
                algorithm,
                last_active_at: now,
            },
        );
    }

    /// Decide whether a request for `key` is admitted.
    ///
    /// Refreshes the key's activity timestamp before consulting its
    /// algorithm. Returns [`TurnstileError::NotFound`] if the key was never
    /// added or has been evicted.
    pub fn allow(&self, key: &str) -> Result<bool> {
        let algorithm = self
            .registry
            .touch(key)
            .ok_or_else(|| TurnstileError::NotFound {
                key: key.to_string(),
            })?;

        Ok(admit(key, algorithm.as_ref()))
    }

    /// Decide whether a request for `key` is admitted, creating its record first if needed.
    ///
    /// `factory` runs only when no live record exists, and never while the
    /// registry lock is held, so it may itself call into this limiter. If
    /// another caller inserts `key` while `factory` runs, that record wins
    /// and the freshly built algorithm is discarded. An error from `factory`
    /// is returned without inserting anything.
    pub fn allow_or_add_with<F>(&self, key: &str, factory: F) -> Result<bool>
    where
        F: FnOnce() -> Result<Box<dyn Algorithm>>,
    {
        if let Some(algorithm) = self.registry.touch(key) {
            return Ok(admit(key, algorithm.as_ref()));
        }

        let created: Arc<dyn Algorithm> = Arc::from(factory()?);

        let algorithm = {
            let mut records = self.registry.records.lock();
            let now = self.registry.clock.now();

            let existing = match records.get_mut(key) {
                Some(record) if !self.registry.is_expired(record, now) => {
                    record.last_active_at = now;
                    Some(Arc::clone(&record.algorithm))
                }
                _ => None,
            };

            match existing {
                Some(algorithm) => algorithm,
                None => {
                    debug!(key = %key, "Creating rate limit record");
                    records.insert(
                        key.to_string(),
                        Record {
                            algorithm: Arc::clone(&created),
                            last_active_at: now,
                        },
                    );
                    created
                }
            }
        };

        Ok(admit(key, algorithm.as_ref()))
    }

    /// Remove the record for `key`.
    ///
    /// Returns `true` if a record was present.
    pub fn remove(&self, key: &str) -> bool {
        self.registry.records.lock().remove(key).is_some()
    }

    /// Snapshot of every record currently held, expired or not.
    ///
    /// Intended for diagnostics; the snapshot does not track later changes.
    pub fn get_records(&self) -> HashMap<String, Record> {
        self.registry.records.lock().clone()
    }

    /// Run one eviction pass now.
    ///
    /// Returns the number of records removed.
    pub fn sweep(&self) -> usize {
        self.registry.sweep()
    }

    /// Get the number of records currently held.
    pub fn len(&self) -> usize {
        self.registry.records.lock().len()
    }

    /// Check whether no records are held.
    pub fn is_empty(&self) -> bool {
        self.registry.records.lock().is_empty()
    }

    /// Remove all records.
    pub fn clear(&self) {
        self.registry.records.lock().clear();
    }

    /// Get the idle time after which a record is evicted.
    pub fn ttl(&self) -> Duration {
        self.registry.ttl
    }

    /// Get the cadence of the cleanup task.
    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.cleanup_task.abort();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("ttl", &self.registry.ttl)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("records", &self.len())
            .finish()
    }
}

fn admit(key: &str, algorithm: &dyn Algorithm) -> bool {
    let allowed = algorithm.allow();
    if allowed {
        trace!(key = %key, "Request admitted");
    } else {
        debug!(key = %key, "Rate limit exceeded");
    }
    allowed
}

/// Evict idle records every `cleanup_interval` until the registry is gone.
async fn run_cleanup(registry: Weak<Registry>, cleanup_interval: Duration) {
    let mut ticker = tokio::time::interval(cleanup_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick completes immediately
    ticker.tick().await;
    info!("Cleanup task started");

    loop {
        ticker.tick().await;

        let Some(registry) = registry.upgrade() else {
            break;
        };

        let evicted = registry.sweep();
        if evicted > 0 {
            debug!(evicted = evicted, "Evicted idle rate limit records");
        }
    }

    info!("Cleanup task stopped");
}
