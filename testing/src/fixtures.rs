//! Ready-made catalog entities and log entries.
//!
//! Events default to an ACTIVE window of 30 days centred on `now`, with the
//! condition each built-in strategy expects.

use chrono::{DateTime, Duration, Utc};
use rewardflow_core::types::{
    ApprovalMode, EventDefinition, EventId, EventLogEntry, EventStatus, EventType, Reward,
    RewardId, RewardType, UserId,
};
use serde_json::{Value, json};

/// The default condition for a built-in event type.
#[must_use]
pub fn default_condition(event_type: &EventType) -> Value {
    match event_type {
        EventType::DailyLogin => json!({ "consecutiveDays": 3 }),
        EventType::InviteFriends => json!({ "friendCount": 2 }),
        EventType::QuestComplete => json!({ "questId": "tutorial" }),
        EventType::LevelUp => json!({ "targetLevel": 10 }),
        EventType::ProfileComplete => json!({ "requiredFields": ["avatar", "nickname"] }),
        EventType::Custom(_) => json!({}),
    }
}

/// An ACTIVE event of `event_type` with its default condition.
#[must_use]
pub fn event(event_type: EventType, approval_mode: ApprovalMode, now: DateTime<Utc>) -> EventDefinition {
    let condition = default_condition(&event_type);
    event_with_condition(event_type, condition, approval_mode, now)
}

/// An ACTIVE event with an explicit condition.
#[must_use]
pub fn event_with_condition(
    event_type: EventType,
    condition: Value,
    approval_mode: ApprovalMode,
    now: DateTime<Utc>,
) -> EventDefinition {
    EventDefinition {
        id: EventId::new(),
        name: format!("{event_type} event"),
        description: "fixture".to_string(),
        event_type,
        condition,
        start_date: now - Duration::days(15),
        end_date: now + Duration::days(15),
        status: EventStatus::Active,
        approval_mode,
        creator_id: UserId::new(),
        created_at: now,
        updated_at: now,
    }
}

/// A POINTS reward worth 100 with the given stock.
#[must_use]
pub fn reward(event_id: EventId, quantity: i64, now: DateTime<Utc>) -> Reward {
    Reward {
        id: RewardId::new(),
        name: "100 points".to_string(),
        description: "fixture".to_string(),
        reward_type: RewardType::Points,
        value: 100,
        quantity,
        event_id,
        creator_id: UserId::new(),
        created_at: now,
        updated_at: now,
    }
}

/// A log entry for `user_id`.
#[must_use]
pub fn log_entry(
    user_id: UserId,
    event_type: EventType,
    data: Value,
    at: DateTime<Utc>,
) -> EventLogEntry {
    EventLogEntry::new(user_id, event_type, data, at)
}

/// One DAILY_LOGIN entry per offset, in days from `day0`.
#[must_use]
pub fn logins(user_id: UserId, day0: DateTime<Utc>, day_offsets: &[i64]) -> Vec<EventLogEntry> {
    day_offsets
        .iter()
        .map(|offset| {
            log_entry(
                user_id,
                EventType::DailyLogin,
                json!({}),
                day0 + Duration::days(*offset),
            )
        })
        .collect()
}
