//! Level targets.

use super::{ConditionStrategy, parse_condition};
use rewardflow_core::store::EventLogStore;
use rewardflow_core::types::{EventType, UserId};
use rewardflow_core::{BoxFuture, RewardError};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LevelUpCondition {
    target_level: i64,
}

/// `LEVEL_UP`: the most recent entry's `newLevel` reaches `targetLevel`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LevelUpStrategy;

impl ConditionStrategy for LevelUpStrategy {
    fn evaluate<'a>(
        &'a self,
        user_id: UserId,
        condition: &'a serde_json::Value,
        log: &'a dyn EventLogStore,
    ) -> BoxFuture<'a, Result<bool, RewardError>> {
        Box::pin(async move {
            let params: LevelUpCondition = parse_condition(&EventType::LevelUp, condition)?;

            let level = log
                .latest(user_id, EventType::LevelUp)
                .await?
                .and_then(|e| e.data.get("newLevel").and_then(serde_json::Value::as_i64));

            Ok(level.is_some_and(|level| level >= params.target_level))
        })
    }
}
