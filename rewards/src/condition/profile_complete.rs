//! Profile completeness.

use super::{ConditionStrategy, parse_condition};
use rewardflow_core::store::EventLogStore;
use rewardflow_core::types::{EventType, UserId};
use rewardflow_core::{BoxFuture, RewardError};
use serde::Deserialize;
use std::collections::HashSet;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileCompleteCondition {
    required_fields: Vec<String>,
}

/// `PROFILE_COMPLETE`: the most recent entry's `completedFields` contain
/// every one of `requiredFields`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileCompleteStrategy;

impl ConditionStrategy for ProfileCompleteStrategy {
    fn evaluate<'a>(
        &'a self,
        user_id: UserId,
        condition: &'a serde_json::Value,
        log: &'a dyn EventLogStore,
    ) -> BoxFuture<'a, Result<bool, RewardError>> {
        Box::pin(async move {
            let params: ProfileCompleteCondition =
                parse_condition(&EventType::ProfileComplete, condition)?;

            let Some(latest) = log.latest(user_id, EventType::ProfileComplete).await? else {
                return Ok(false);
            };

            let completed: HashSet<&str> = latest
                .data
                .get("completedFields")
                .and_then(serde_json::Value::as_array)
                .map(|fields| fields.iter().filter_map(serde_json::Value::as_str).collect())
                .unwrap_or_default();

            Ok(params
                .required_fields
                .iter()
                .all(|field| completed.contains(field.as_str())))
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
    async fn superset_of_required_fields_satisfies() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        store.seed_log([fixtures::log_entry(
            user,
            EventType::ProfileComplete,
            json!({ "completedFields": ["avatar", "nickname", "bio"] }),
            test_clock().now(),
        )]);

        let condition = json!({ "requiredFields": ["avatar", "nickname"] });
        assert!(ProfileCompleteStrategy.evaluate(user, &condition, &store).await.unwrap());
    }

    #[tokio::test]
    async fn missing_field_fails() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        store.seed_log([fixtures::log_entry(
            user,
            EventType::ProfileComplete,
            json!({ "completedFields": ["avatar"] }),
            test_clock().now(),
        )]);

        let condition = json!({ "requiredFields": ["avatar", "nickname"] });
        assert!(!ProfileCompleteStrategy.evaluate(user, &condition, &store).await.unwrap());
    }
}
