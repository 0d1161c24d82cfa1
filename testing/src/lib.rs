//! # Rewardflow Testing
//!
//! Testing utilities for the reward pipeline.
//!
//! This crate provides:
//! - A controllable [`FixedClock`]
//! - [`InMemoryStore`], implementing every store trait with the same atomicity
//!   guarantees as the `PostgreSQL` store, plus fault injection
//! - Fixtures for event definitions, rewards and log entries
//!
//! ## Example
//!
//! ```
//! use rewardflow_testing::{InMemoryStore, fixtures, test_clock};
//! use rewardflow_core::environment::Clock;
//! use rewardflow_core::store::RewardStore;
//! use rewardflow_core::types::{ApprovalMode, EventType};
//!
//! # tokio_test_block_on(async {
//! let clock = test_clock();
//! let store = InMemoryStore::new();
//! let event = fixtures::event(EventType::DailyLogin, ApprovalMode::Auto, clock.now());
//! let reward = fixtures::reward(event.id, 1, clock.now());
//! store.seed_event(event);
//! store.seed_reward(reward.clone());
//!
//! let after = store.decrement_if_available(reward.id).await.unwrap();
//! assert_eq!(after.quantity, 0);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use chrono::{DateTime, Duration, Utc};
use rewardflow_core::environment::Clock;
use std::sync::{Arc, Mutex, PoisonError};

pub mod fixtures;
mod stores;

pub use stores::InMemoryStore;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Arc, Clock, DateTime, Duration, Mutex, PoisonError, Utc};

    /// Deterministic clock for tests.
    ///
    /// Returns the same instant until moved with [`FixedClock::advance`] or
    /// [`FixedClock::set`]. Clones share the same instant.
    ///
    /// # Example
    ///
    /// ```
    /// use rewardflow_testing::mocks::FixedClock;
    /// use rewardflow_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let start = Utc::now();
    /// let clock = FixedClock::new(start);
    /// assert_eq!(clock.now(), clock.now());
    ///
    /// clock.advance(Duration::days(1));
    /// assert_eq!(clock.now(), start + Duration::days(1));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a clock frozen at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute instant.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// A fixed clock at 2025-01-01 00:00:00 UTC.
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which cannot happen.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

pub use mocks::{FixedClock, test_clock};
