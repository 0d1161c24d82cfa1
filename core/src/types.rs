//! Domain types for the reward request pipeline.
//!
//! This module contains identifiers, the catalog entities operators configure
//! (event definitions and rewards), the append-only event log entry, and the
//! reward request record whose lifecycle the pipeline drives.

use crate::error::RewardError;
use crate::idempotency::IdempotencyKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = RewardError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self).map_err(|e| {
                    RewardError::Validation(format!(
                        concat!("invalid ", stringify!($name), " '{}': {}"),
                        s, e
                    ))
                })
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a user (supplied by the identity layer)
    UserId
);
uuid_id!(
    /// Unique identifier for an event definition
    EventId
);
uuid_id!(
    /// Unique identifier for a reward
    RewardId
);
uuid_id!(
    /// Unique identifier for a reward request
    RequestId
);
uuid_id!(
    /// Unique identifier for an event log entry
    LogEntryId
);

/// Who performed a state transition.
///
/// Either the pipeline itself (`system`) or the id of the user/admin that
/// triggered the transition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    const SYSTEM: &'static str = "system";

    /// The pipeline acting on its own (auto approval, background workflows).
    #[must_use]
    pub fn system() -> Self {
        Self(Self::SYSTEM.to_string())
    }

    /// An actor identified by a user id (requester or admin).
    #[must_use]
    pub fn user(user_id: &UserId) -> Self {
        Self(user_id.to_string())
    }

    /// Wrap a raw actor string read back from storage.
    #[must_use]
    pub const fn from_raw(raw: String) -> Self {
        Self(raw)
    }

    /// Whether this is the system actor.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.0 == Self::SYSTEM
    }

    /// Borrow the raw actor string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Enumerations
// ============================================================================

/// Kind of user action an event definition reacts to.
///
/// The known kinds have dedicated condition strategies. Operators may define
/// other kinds; they are carried as `Custom` and evaluate as unsupported until
/// a strategy is registered for them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    /// Consecutive-day login streaks
    DailyLogin,
    /// Referral of distinct friends
    InviteFriends,
    /// Completion of a specific quest
    QuestComplete,
    /// Reaching a target level
    LevelUp,
    /// Filling in a set of profile fields
    ProfileComplete,
    /// Operator-defined kind without a built-in strategy
    Custom(String),
}

impl EventType {
    /// Wire representation (`DAILY_LOGIN`, ...).
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::DailyLogin => "DAILY_LOGIN",
            Self::InviteFriends => "INVITE_FRIENDS",
            Self::QuestComplete => "QUEST_COMPLETE",
            Self::LevelUp => "LEVEL_UP",
            Self::ProfileComplete => "PROFILE_COMPLETE",
            Self::Custom(name) => name,
        }
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "DAILY_LOGIN" => Self::DailyLogin,
            "INVITE_FRIENDS" => Self::InviteFriends,
            "QUEST_COMPLETE" => Self::QuestComplete,
            "LEVEL_UP" => Self::LevelUp,
            "PROFILE_COMPLETE" => Self::ProfileComplete,
            _ => Self::Custom(value),
        }
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        match value {
            EventType::Custom(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-controlled availability of an event definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    /// Accepting reward requests (within its time window)
    Active,
    /// Not accepting reward requests
    Inactive,
}

impl EventStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
        }
    }
}

impl FromStr for EventStatus {
    type Err = RewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "INACTIVE" => Ok(Self::Inactive),
            other => Err(RewardError::Validation(format!(
                "invalid event status: {other}"
            ))),
        }
    }
}

/// Whether satisfied requests are granted immediately or wait for an admin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalMode {
    /// Grant as soon as the request is validated
    Auto,
    /// Leave PENDING until an admin approves or rejects
    Manual,
}

impl ApprovalMode {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Manual => "MANUAL",
        }
    }
}

impl FromStr for ApprovalMode {
    type Err = RewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTO" => Ok(Self::Auto),
            "MANUAL" => Ok(Self::Manual),
            other => Err(RewardError::Validation(format!(
                "invalid approval mode: {other}"
            ))),
        }
    }
}

/// What a reward grants.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RewardType {
    /// Loyalty points
    Points,
    /// A physical or virtual item
    Item,
    /// A discount coupon
    Coupon,
    /// In-app currency
    Currency,
    /// Operator-defined reward kind
    Custom(String),
}

impl RewardType {
    /// Wire representation (`POINTS`, ...).
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Points => "POINTS",
            Self::Item => "ITEM",
            Self::Coupon => "COUPON",
            Self::Currency => "CURRENCY",
            Self::Custom(name) => name,
        }
    }
}

impl From<String> for RewardType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "POINTS" => Self::Points,
            "ITEM" => Self::Item,
            "COUPON" => Self::Coupon,
            "CURRENCY" => Self::Currency,
            _ => Self::Custom(value),
        }
    }
}

impl From<RewardType> for String {
    fn from(value: RewardType) -> Self {
        match value {
            RewardType::Custom(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

/// Lifecycle state of a reward request.
///
/// ```text
/// PENDING ──► APPROVED ──► COMPLETED
///    │            └──────► FAILED
///    ├──► COMPLETED
///    ├──► REJECTED
///    └──► FAILED
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    /// Recorded, awaiting processing or admin action
    Pending,
    /// Approved by an admin, awaiting claim/fulfillment
    Approved,
    /// Reward granted and inventory decremented
    Completed,
    /// Refused (inactive event, depleted stock, condition not met, admin)
    Rejected,
    /// Processing error; the message carries the detail
    Failed,
}

impl RequestStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Completed => "COMPLETED",
            Self::Rejected => "REJECTED",
            Self::Failed => "FAILED",
        }
    }

    /// Terminal states never transition again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Failed)
    }

    /// Active requests still hold a claim on the user/event pair.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = RewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "COMPLETED" => Ok(Self::Completed),
            "REJECTED" => Ok(Self::Rejected),
            "FAILED" => Ok(Self::Failed),
            other => Err(RewardError::Validation(format!(
                "invalid request status: {other}"
            ))),
        }
    }
}

// ============================================================================
// Catalog entities
// ============================================================================

/// An operator-defined event users can earn rewards from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDefinition {
    /// Event ID
    pub id: EventId,
    /// Display name
    pub name: String,
    /// Display description
    pub description: String,
    /// Which user action this event reacts to
    pub event_type: EventType,
    /// Strategy parameters, keyed by event type (e.g. `{"consecutiveDays": 7}`)
    pub condition: serde_json::Value,
    /// Window start (inclusive)
    pub start_date: DateTime<Utc>,
    /// Window end (inclusive)
    pub end_date: DateTime<Utc>,
    /// Operator-controlled status
    pub status: EventStatus,
    /// Auto or manual approval
    pub approval_mode: ApprovalMode,
    /// Operator that created the event
    pub creator_id: UserId,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

impl EventDefinition {
    /// Check the definition's own invariants.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::Validation`] if the name is blank or the window
    /// does not end after it starts.
    pub fn validate(&self) -> Result<(), RewardError> {
        if self.name.trim().is_empty() {
            return Err(RewardError::Validation(
                "event name must not be empty".to_string(),
            ));
        }
        if self.end_date <= self.start_date {
            return Err(RewardError::Validation(format!(
                "event end {} must be after start {}",
                self.end_date, self.start_date
            )));
        }
        Ok(())
    }

    /// Active iff status is ACTIVE and `now` lies within `[start, end]`.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Active && self.start_date <= now && now <= self.end_date
    }
}

/// A reward attached to an event, with its finite (or unlimited) stock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    /// Reward ID
    pub id: RewardId,
    /// Display name
    pub name: String,
    /// Display description
    pub description: String,
    /// What the reward grants
    pub reward_type: RewardType,
    /// Amount granted (points, currency units, ...)
    pub value: i64,
    /// Remaining stock; [`Reward::UNLIMITED`] means no limit
    pub quantity: i64,
    /// Owning event
    pub event_id: EventId,
    /// Operator that created the reward
    pub creator_id: UserId,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

impl Reward {
    /// Sentinel quantity for rewards without a stock limit.
    pub const UNLIMITED: i64 = -1;

    /// Whether the reward has no stock limit.
    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        self.quantity == Self::UNLIMITED
    }

    /// Whether a limited reward has run out.
    #[must_use]
    pub const fn is_depleted(&self) -> bool {
        !self.is_unlimited() && self.quantity <= 0
    }

    /// Check the reward's own invariants.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::Validation`] if the name is blank or the quantity
    /// is below [`Reward::UNLIMITED`].
    pub fn validate(&self) -> Result<(), RewardError> {
        if self.name.trim().is_empty() {
            return Err(RewardError::Validation(
                "reward name must not be empty".to_string(),
            ));
        }
        validate_quantity(self.quantity)
    }
}

/// Quantities must be `-1` (unlimited) or non-negative.
///
/// # Errors
///
/// Returns [`RewardError::Validation`] for quantities below `-1`.
pub fn validate_quantity(quantity: i64) -> Result<(), RewardError> {
    if quantity < Reward::UNLIMITED {
        return Err(RewardError::Validation(format!(
            "reward quantity must be >= -1 (got {quantity})"
        )));
    }
    Ok(())
}

// ============================================================================
// Event log
// ============================================================================

/// One user action, recorded append-only.
///
/// Condition state (streaks, referral counts, ...) is always derived by
/// replaying these entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogEntry {
    /// Entry ID
    pub id: LogEntryId,
    /// Acting user
    pub user_id: UserId,
    /// Kind of action
    pub event_type: EventType,
    /// Free-form payload (`questId`, `newLevel`, `invitedUserId`, ...)
    pub data: serde_json::Value,
    /// When the action happened
    pub timestamp: DateTime<Utc>,
}

impl EventLogEntry {
    /// Creates a new entry with a fresh id.
    #[must_use]
    pub fn new(
        user_id: UserId,
        event_type: EventType,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LogEntryId::new(),
            user_id,
            event_type,
            data,
            timestamp,
        }
    }
}

// ============================================================================
// Reward requests
// ============================================================================

/// Audit annotation attached to a reward request.
///
/// Notes may be appended in any state, including terminal ones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditNote {
    /// When the note was written
    pub at: DateTime<Utc>,
    /// Who wrote it
    pub by: ActorId,
    /// Note text
    pub text: String,
}

/// The durable record of one user's attempt to claim a reward.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardRequest {
    /// Request ID
    pub id: RequestId,
    /// Requesting user
    pub user_id: UserId,
    /// Event the claim is made against
    pub event_id: EventId,
    /// Reward being claimed (resolved during processing)
    pub reward_id: Option<RewardId>,
    /// Lifecycle state
    pub status: RequestStatus,
    /// Globally unique deduplication key
    pub idempotency_key: IdempotencyKey,
    /// Rejection reason, failure detail or processing note
    pub message: Option<String>,
    /// When the last decisive transition happened
    pub processed_at: Option<DateTime<Utc>>,
    /// Who performed the last decisive transition
    pub processed_by: Option<ActorId>,
    /// When the request was recorded
    pub created_at: DateTime<Utc>,
    /// When the request was last written
    pub updated_at: DateTime<Utc>,
    /// Audit trail
    #[serde(default)]
    pub notes: Vec<AuditNote>,
}

impl RewardRequest {
    /// A freshly recorded request in PENDING.
    #[must_use]
    pub fn pending(
        user_id: UserId,
        event_id: EventId,
        reward_id: Option<RewardId>,
        idempotency_key: IdempotencyKey,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            user_id,
            event_id,
            reward_id,
            status: RequestStatus::Pending,
            idempotency_key,
            message: None,
            processed_at: None,
            processed_by: None,
            created_at: now,
            updated_at: now,
            notes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn event_type_round_trips_known_and_custom_names() {
        assert_eq!(EventType::from("DAILY_LOGIN"), EventType::DailyLogin);
        assert_eq!(
            EventType::from("WATCH_AD"),
            EventType::Custom("WATCH_AD".to_string())
        );

        let json = serde_json::to_string(&EventType::LevelUp).unwrap();
        assert_eq!(json, "\"LEVEL_UP\"");
        let custom: EventType = serde_json::from_str("\"WATCH_AD\"").unwrap();
        assert_eq!(custom.as_str(), "WATCH_AD");
    }

    #[test]
    fn ids_reject_malformed_strings() {
        let err = "not-a-uuid".parse::<EventId>().unwrap_err();
        assert!(matches!(err, RewardError::Validation(_)));

        let id = EventId::new();
        assert_eq!(id.to_string().parse::<EventId>().unwrap(), id);
    }

    #[test]
    fn reward_depletion_respects_unlimited_sentinel() {
        let now = Utc::now();
        let mut reward = Reward {
            id: RewardId::new(),
            name: "Badge".to_string(),
            description: String::new(),
            reward_type: RewardType::Item,
            value: 1,
            quantity: Reward::UNLIMITED,
            event_id: EventId::new(),
            creator_id: UserId::new(),
            created_at: now,
            updated_at: now,
        };
        assert!(!reward.is_depleted());

        reward.quantity = 0;
        assert!(reward.is_depleted());

        reward.quantity = -2;
        assert!(reward.validate().is_err());
    }

    #[test]
    fn event_window_is_inclusive() {
        let start = Utc::now();
        let end = start + chrono::Duration::days(1);
        let event = EventDefinition {
            id: EventId::new(),
            name: "Streak".to_string(),
            description: String::new(),
            event_type: EventType::DailyLogin,
            condition: serde_json::json!({ "consecutiveDays": 3 }),
            start_date: start,
            end_date: end,
            status: EventStatus::Active,
            approval_mode: ApprovalMode::Auto,
            creator_id: UserId::new(),
            created_at: start,
            updated_at: start,
        };

        assert!(event.is_active_at(start));
        assert!(event.is_active_at(end));
        assert!(!event.is_active_at(end + chrono::Duration::seconds(1)));

        let inactive = EventDefinition {
            status: EventStatus::Inactive,
            ..event
        };
        assert!(!inactive.is_active_at(start));
    }

    #[test]
    fn reward_request_serde_preserves_key_status_and_timestamps() {
        let now = Utc::now();
        let mut request = RewardRequest::pending(
            UserId::new(),
            EventId::new(),
            Some(RewardId::new()),
            IdempotencyKey::generate(),
            now,
        );
        request.status = RequestStatus::Completed;
        request.processed_at = Some(now + chrono::Duration::milliseconds(1500));
        request.processed_by = Some(ActorId::system());

        let json = serde_json::to_string(&request).unwrap();
        let restored: RewardRequest = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.idempotency_key, request.idempotency_key);
        assert_eq!(restored.status, RequestStatus::Completed);
        assert_eq!(restored.created_at, request.created_at);
        assert_eq!(restored.processed_at, request.processed_at);
        assert_eq!(restored, request);
    }
}
