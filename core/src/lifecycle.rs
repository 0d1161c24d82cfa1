//! Reward request state machine.
//!
//! ```text
//! PENDING ──► APPROVED ──► COMPLETED
//!    │            └──────► FAILED
//!    ├──► COMPLETED
//!    ├──► REJECTED
//!    └──► FAILED
//! ```
//!
//! Transitions are pure: each returns the next version of the request, which
//! the caller then persists with a compare-and-set against the status it was
//! derived from.

use crate::error::RewardError;
use crate::types::{ActorId, AuditNote, RequestStatus, RewardId, RewardRequest};
use chrono::{DateTime, Utc};

impl RequestStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Approved | Self::Completed | Self::Rejected | Self::Failed
            ) | (Self::Approved, Self::Completed | Self::Failed)
        )
    }
}

impl RewardRequest {
    /// Fail with `InvalidStateTransition` unless `next` is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::InvalidStateTransition`] naming the current state.
    pub const fn ensure_transition(&self, next: RequestStatus) -> Result<(), RewardError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(RewardError::InvalidStateTransition {
                current: self.status,
                attempted: next,
            })
        }
    }

    /// The next version of this request in status `next`.
    ///
    /// Stamps `processed_at`/`processed_by` and replaces the message when one
    /// is given.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::InvalidStateTransition`] if the move is illegal.
    pub fn transitioned(
        &self,
        next: RequestStatus,
        message: Option<String>,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> Result<Self, RewardError> {
        self.ensure_transition(next)?;

        let mut updated = self.clone();
        updated.status = next;
        if message.is_some() {
            updated.message = message;
        }
        updated.processed_at = Some(now);
        updated.processed_by = Some(actor);
        updated.updated_at = now;
        Ok(updated)
    }

    /// PENDING → APPROVED.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::InvalidStateTransition`] unless PENDING.
    pub fn approved(&self, actor: ActorId, now: DateTime<Utc>) -> Result<Self, RewardError> {
        self.transitioned(RequestStatus::Approved, None, actor, now)
    }

    /// PENDING/APPROVED → COMPLETED.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::InvalidStateTransition`] from terminal states.
    pub fn completed(
        &self,
        message: Option<String>,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> Result<Self, RewardError> {
        self.transitioned(RequestStatus::Completed, message, actor, now)
    }

    /// PENDING → REJECTED.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::InvalidStateTransition`] unless PENDING.
    pub fn rejected(
        &self,
        reason: impl Into<String>,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> Result<Self, RewardError> {
        self.transitioned(RequestStatus::Rejected, Some(reason.into()), actor, now)
    }

    /// PENDING/APPROVED → FAILED.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::InvalidStateTransition`] from terminal states.
    pub fn failed(
        &self,
        detail: impl Into<String>,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> Result<Self, RewardError> {
        self.transitioned(RequestStatus::Failed, Some(detail.into()), actor, now)
    }

    /// This request with its reward resolved. Status is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::InvalidStateTransition`] once the request is
    /// terminal.
    pub fn with_reward(&self, reward_id: RewardId, now: DateTime<Utc>) -> Result<Self, RewardError> {
        if self.status.is_terminal() {
            return Err(RewardError::InvalidStateTransition {
                current: self.status,
                attempted: self.status,
            });
        }
        let mut updated = self.clone();
        updated.reward_id = Some(reward_id);
        updated.updated_at = now;
        Ok(updated)
    }

    /// Build an audit note for this request. Notes are accepted in any status.
    #[must_use]
    pub fn note(text: impl Into<String>, by: ActorId, at: DateTime<Utc>) -> AuditNote {
        AuditNote {
            at,
            by,
            text: text.into(),
        }
    }
}
