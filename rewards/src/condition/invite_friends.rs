//! Referral counts.

use super::{ConditionStrategy, parse_condition};
use rewardflow_core::store::EventLogStore;
use rewardflow_core::types::{EventType, UserId};
use rewardflow_core::{BoxFuture, RewardError};
use serde::Deserialize;
use std::collections::HashSet;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InviteFriendsCondition {
    friend_count: u32,
}

/// `INVITE_FRIENDS`: at least `friendCount` distinct `invitedUserId`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct InviteFriendsStrategy;

impl ConditionStrategy for InviteFriendsStrategy {
    fn evaluate<'a>(
        &'a self,
        user_id: UserId,
        condition: &'a serde_json::Value,
        log: &'a dyn EventLogStore,
    ) -> BoxFuture<'a, Result<bool, RewardError>> {
        Box::pin(async move {
            let params: InviteFriendsCondition =
                parse_condition(&EventType::InviteFriends, condition)?;

            let entries = log.entries(user_id, EventType::InviteFriends).await?;
            let invited: HashSet<&str> = entries
                .iter()
                .filter_map(|e| e.data.get("invitedUserId").and_then(serde_json::Value::as_str))
                .collect();

            let invited = u32::try_from(invited.len()).unwrap_or(u32::MAX);
            Ok(invited >= params.friend_count)
        })
    }
}
