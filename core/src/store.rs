//! Persistence seam for the reward pipeline.
//!
//! Four store traits cover the data the pipeline reads and writes. Each one is
//! deliberately narrow: the operations that must be atomic are exposed as
//! single calls so implementations can map them onto one conditional statement.
//!
//! - [`RewardStore::decrement_if_available`]: conditional decrement, never below 0
//! - [`RewardRequestStore::insert_unique`]: unique insert on the idempotency key
//! - [`RewardRequestStore::transition`]: compare-and-set on the request status
//!
//! # Implementations
//!
//! - `PostgresStore` (in `rewardflow-postgres`): production storage
//! - `InMemory*Store` (in `rewardflow-testing`): fast, deterministic testing
//!
//! # Dyn Compatibility
//!
//! Methods return [`BoxFuture`] instead of using `async fn` so the services can
//! hold `Arc<dyn RewardStore>` and friends.

use crate::idempotency::IdempotencyKey;
use crate::types::{
    AuditNote, EventDefinition, EventId, EventLogEntry, EventStatus, EventType, RequestId,
    RequestStatus, Reward, RewardId, RewardRequest, UserId,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed, `Send` future returned by every store method.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors reported by store implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The addressed row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind (`event`, `reward`, `request`)
        entity: &'static str,
        /// The id that was addressed
        id: String,
    },

    /// Conditional decrement found no stock left.
    #[error("Reward {reward_id} is out of stock")]
    OutOfStock {
        /// The depleted reward
        reward_id: String,
    },

    /// Compare-and-set on a request status lost: the stored status differs.
    #[error("Status mismatch: expected {expected}, found {actual}")]
    StatusMismatch {
        /// Status the caller expected to replace
        expected: RequestStatus,
        /// Status actually stored
        actual: RequestStatus,
    },

    /// Backend unreachable, timed out or returned an I/O error.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A constraint other than the idempotency key was violated.
    #[error("Constraint violation: {0}")]
    Constraint(String),
}

impl StoreError {
    /// Shorthand for a missing row.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Result of [`RewardRequestStore::insert_unique`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was inserted; the caller owns the key.
    Inserted(RewardRequest),
    /// A row with the same idempotency key already exists; it is returned
    /// unchanged.
    Existing(RewardRequest),
}

impl InsertOutcome {
    /// The stored request, whichever side won.
    #[must_use]
    pub fn into_request(self) -> RewardRequest {
        match self {
            Self::Inserted(request) | Self::Existing(request) => request,
        }
    }
}

/// Operator-defined event definitions.
pub trait EventDefinitionStore: Send + Sync {
    /// Insert a new event definition.
    ///
    /// # Errors
    ///
    /// - `Constraint`: an event with the same id exists
    /// - `Unavailable`: backend failure
    fn insert(&self, event: EventDefinition) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Load an event definition by id.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn get(&self, id: EventId) -> BoxFuture<'_, Result<Option<EventDefinition>, StoreError>>;

    /// Change an event's status, returning the updated definition.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no event with this id
    /// - `Unavailable`: backend failure
    fn update_status(
        &self,
        id: EventId,
        status: EventStatus,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<EventDefinition, StoreError>>;

    /// Events of the given type that are ACTIVE and whose window contains `now`.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn list_active_by_type(
        &self,
        event_type: EventType,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<EventDefinition>, StoreError>>;
}

/// Rewards and their inventory.
pub trait RewardStore: Send + Sync {
    /// Insert a new reward.
    ///
    /// # Errors
    ///
    /// - `Constraint`: a reward with the same id exists, or the event is unknown
    /// - `Unavailable`: backend failure
    fn insert(&self, reward: Reward) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Load a reward by id.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn get(&self, id: RewardId) -> BoxFuture<'_, Result<Option<Reward>, StoreError>>;

    /// Rewards attached to an event, ordered by creation (oldest first).
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn list_for_event(&self, event_id: EventId)
    -> BoxFuture<'_, Result<Vec<Reward>, StoreError>>;

    /// Atomically take one unit of stock.
    ///
    /// Unlimited rewards are returned unchanged. Limited rewards are decremented
    /// by one only if their quantity is positive; this must be a single
    /// conditional update so concurrent callers can never drive it below zero.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no reward with this id
    /// - `OutOfStock`: the reward is limited and has no stock left
    /// - `Unavailable`: backend failure
    fn decrement_if_available(&self, id: RewardId)
    -> BoxFuture<'_, Result<Reward, StoreError>>;

    /// Administrative overwrite of a reward's quantity.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no reward with this id
    /// - `Unavailable`: backend failure
    fn set_quantity(
        &self,
        id: RewardId,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Reward, StoreError>>;
}

/// Append-only log of user actions.
pub trait EventLogStore: Send + Sync {
    /// Append an entry. Entries are never updated or deleted; appending an id
    /// that is already present is a no-op.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn append(&self, entry: EventLogEntry) -> BoxFuture<'_, Result<(), StoreError>>;

    /// All entries of one type for a user, oldest first.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn entries(
        &self,
        user_id: UserId,
        event_type: EventType,
    ) -> BoxFuture<'_, Result<Vec<EventLogEntry>, StoreError>>;

    /// The most recent entry of one type for a user.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn latest(
        &self,
        user_id: UserId,
        event_type: EventType,
    ) -> BoxFuture<'_, Result<Option<EventLogEntry>, StoreError>>;
}

/// Durable reward request records.
pub trait RewardRequestStore: Send + Sync {
    /// Insert a request unless its idempotency key is already taken.
    ///
    /// Concurrent inserts with the same key produce exactly one row; the loser
    /// gets [`InsertOutcome::Existing`] with the winner's row.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn insert_unique(
        &self,
        request: RewardRequest,
    ) -> BoxFuture<'_, Result<InsertOutcome, StoreError>>;

    /// Load a request by id.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn get(&self, id: RequestId) -> BoxFuture<'_, Result<Option<RewardRequest>, StoreError>>;

    /// Load a request by idempotency key.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn find_by_key(
        &self,
        key: IdempotencyKey,
    ) -> BoxFuture<'_, Result<Option<RewardRequest>, StoreError>>;

    /// A PENDING or APPROVED request for the user/event pair, if any.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn find_active(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> BoxFuture<'_, Result<Option<RewardRequest>, StoreError>>;

    /// All requests of a user, newest first.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: backend failure
    fn list_for_user(
        &self,
        user_id: UserId,
    ) -> BoxFuture<'_, Result<Vec<RewardRequest>, StoreError>>;

    /// Write `updated` only if the stored status still equals `expected`.
    ///
    /// Returns the stored row after the write. Two racing transitions from the
    /// same status cannot both succeed.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no request with this id
    /// - `StatusMismatch`: the stored status is no longer `expected`
    /// - `Unavailable`: backend failure
    fn transition(
        &self,
        updated: RewardRequest,
        expected: RequestStatus,
    ) -> BoxFuture<'_, Result<RewardRequest, StoreError>>;

    /// Append an audit note, allowed in every status.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no request with this id
    /// - `Unavailable`: backend failure
    fn append_note(
        &self,
        id: RequestId,
        note: AuditNote,
    ) -> BoxFuture<'_, Result<RewardRequest, StoreError>>;
}
