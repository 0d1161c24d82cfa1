//! Domain error taxonomy.
//!
//! Every entry point of the pipeline returns [`RewardError`]. Storage adapters
//! report [`StoreError`], which converts into the domain taxonomy at the
//! service boundary.

use crate::store::StoreError;
use crate::types::RequestStatus;
use thiserror::Error;

/// Errors surfaced by reward pipeline operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RewardError {
    /// Malformed input (bad id, bad key, missing field, unknown action).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind (`event`, `reward`, `request`)
        entity: &'static str,
        /// The id that was looked up
        id: String,
    },

    /// The requested transition is not allowed from the current status.
    #[error("Invalid state transition: cannot move request from {current} to {attempted}")]
    InvalidStateTransition {
        /// Status the request is actually in
        current: RequestStatus,
        /// Status the caller asked for
        attempted: RequestStatus,
    },

    /// A limited reward has no stock left.
    #[error("Reward {reward_id} is out of stock")]
    OutOfStock {
        /// The depleted reward
        reward_id: String,
    },

    /// A store or dependency is temporarily unreachable. Safe to retry.
    #[error("Transient infrastructure error: {0}")]
    TransientInfra(String),

    /// The user already has an active request for this event under a
    /// different idempotency key.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The caller is not allowed to view or act on the resource.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Inventory was decremented but the request's outcome could not be
    /// recorded. Needs out-of-band reconciliation; never retried.
    #[error("Reconciliation required: {0}")]
    ReconciliationRequired(String),
}

impl RewardError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Only transient infrastructure failures are retryable; every other
    /// variant describes a decision that replaying will reproduce.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientInfra(_))
    }

    /// Stable machine-readable code for the error kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::OutOfStock { .. } => "OUT_OF_STOCK",
            Self::TransientInfra(_) => "TRANSIENT_INFRA",
            Self::Conflict(_) => "CONFLICT",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::ReconciliationRequired(_) => "RECONCILIATION_REQUIRED",
        }
    }

    /// Shorthand for a missing entity.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<StoreError> for RewardError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::OutOfStock { reward_id } => Self::OutOfStock { reward_id },
            StoreError::StatusMismatch { expected, actual } => Self::InvalidStateTransition {
                current: actual,
                attempted: expected,
            },
            StoreError::Constraint(msg) => Self::Conflict(msg),
            StoreError::Serialization(msg) => Self::Validation(msg),
            StoreError::Unavailable(msg) => Self::TransientInfra(msg),
        }
    }
}
