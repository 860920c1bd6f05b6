//! Rate limiting algorithms and the per-key registry.

mod algorithm;
mod clock;
mod fixed_window;
mod keyed;
mod registry;
mod token_bucket;

pub use algorithm::{Algorithm, KeyedAlgorithm};
pub use clock::{Clock, SystemClock};
#[cfg(any(test, feature = "test-util"))]
pub use clock::ManualClock;
pub use fixed_window::{FixedWindowCounter, WindowAlignment};
pub use keyed::KeyedFixedWindow;
pub use registry::{RateLimiter, Record};
pub use token_bucket::TokenBucket;
