//! Quest completion.

use super::{ConditionStrategy, parse_condition};
use rewardflow_core::store::EventLogStore;
use rewardflow_core::types::{EventType, UserId};
use rewardflow_core::{BoxFuture, RewardError};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestCompleteCondition {
    quest_id: String,
}

/// `QUEST_COMPLETE`: some entry's `questId` equals the condition's.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuestCompleteStrategy;

impl ConditionStrategy for QuestCompleteStrategy {
    fn evaluate<'a>(
        &'a self,
        user_id: UserId,
        condition: &'a serde_json::Value,
        log: &'a dyn EventLogStore,
    ) -> BoxFuture<'a, Result<bool, RewardError>> {
        Box::pin(async move {
            let params: QuestCompleteCondition =
                parse_condition(&EventType::QuestComplete, condition)?;

            let entries = log.entries(user_id, EventType::QuestComplete).await?;
            Ok(entries.iter().any(|e| {
                e.data.get("questId").and_then(serde_json::Value::as_str)
                    == Some(params.quest_id.as_str())
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use rewardflow_core::environment::Clock;
    use rewardflow_testing::{InMemoryStore, fixtures, test_clock};
    use serde_json::json;

    #[tokio::test]
    async fn matches_only_the_named_quest() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        store.seed_log([fixtures::log_entry(
            user,
            EventType::QuestComplete,
            json!({ "questId": "dragon" }),
            test_clock().now(),
        )]);

        let strategy = QuestCompleteStrategy;
        assert!(strategy.evaluate(user, &json!({ "questId": "dragon" }), &store).await.unwrap());
        assert!(!strategy.evaluate(user, &json!({ "questId": "tutorial" }), &store).await.unwrap());
    }

    #[tokio::test]
    async fn missing_quest_id_is_malformed() {
        let store = InMemoryStore::new();
        let err = QuestCompleteStrategy
            .evaluate(UserId::new(), &json!({}), &store)
            .await
            .unwrap_err();
        assert!(matches!(err, RewardError::Validation(_)));
    }
}
