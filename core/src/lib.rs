//! # Rewardflow Core
//!
//! Domain types and seams for the reward request pipeline.
//!
//! This crate holds everything the pipeline's services agree on, and nothing that
//! performs I/O:
//!
//! - **Types**: event definitions, rewards, event log entries and reward requests
//! - **Errors**: the domain error taxonomy shared by every entry point
//! - **Environment**: the `Clock` abstraction for deterministic time
//! - **Stores**: dyn-compatible persistence traits (implemented in-memory by
//!   `rewardflow-testing` and on `PostgreSQL` by `rewardflow-postgres`)
//! - **Idempotency**: deterministic and random idempotency keys
//! - **Lifecycle**: the reward request state machine
//!
//! ## Architecture Principles
//!
//! - Pure types, no hidden I/O
//! - Dependency injection through trait objects
//! - Atomicity lives at the storage seam (`decrement_if_available`,
//!   `insert_unique`, `transition`)
//!
//! ## Example
//!
//! ```
//! use rewardflow_core::idempotency::IdempotencyKey;
//! use rewardflow_core::types::{EventId, UserId};
//!
//! let user = UserId::new();
//! let event = EventId::new();
//!
//! let first = IdempotencyKey::for_reward_request(&user, &event);
//! let retry = IdempotencyKey::for_reward_request(&user, &event);
//! assert_eq!(first, retry);
//! ```

#![forbid(unsafe_code)]

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod error;
pub mod idempotency;
pub mod lifecycle;
pub mod store;
pub mod types;

/// Environment module - Dependency injection traits
///
/// All sources of nondeterminism are abstracted behind traits and injected
/// into services.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock = SystemClock;
    ///
    /// // Test - fixed time for deterministic tests
    /// let clock = FixedClock::new(time);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use error::RewardError;
pub use idempotency::IdempotencyKey;
pub use store::{BoxFuture, StoreError};
