//! Condition evaluation.
//!
//! Each event type maps to a [`ConditionStrategy`] that replays the user's
//! event log and decides whether the event's condition holds. The
//! [`ConditionEvaluator`] owns the strategy map; it is assembled explicitly and
//! handed to the services that need it.
//!
//! Strategies never write. A log read that fails or exceeds the evaluator's
//! timeout is a [`RewardError::TransientInfra`], never a silent `false`.

mod daily_login;
mod invite_friends;
mod level_up;
mod profile_complete;
mod quest_complete;

pub use daily_login::{DailyLoginStrategy, current_streak};
pub use invite_friends::InviteFriendsStrategy;
pub use level_up::LevelUpStrategy;
pub use profile_complete::ProfileCompleteStrategy;
pub use quest_complete::QuestCompleteStrategy;

use rewardflow_core::store::EventLogStore;
use rewardflow_core::types::{EventDefinition, EventType, UserId};
use rewardflow_core::{BoxFuture, RewardError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of evaluating an event condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Evaluation {
    /// The user fulfils the condition
    Satisfied,
    /// The user does not (yet) fulfil the condition
    NotSatisfied,
    /// No strategy is registered for the event type
    Unsupported,
}

impl Evaluation {
    /// Whether the condition holds.
    #[must_use]
    pub const fn is_satisfied(self) -> bool {
        matches!(self, Self::Satisfied)
    }

    const fn from_bool(satisfied: bool) -> Self {
        if satisfied {
            Self::Satisfied
        } else {
            Self::NotSatisfied
        }
    }
}

/// Decides one event type's condition from the event log.
pub trait ConditionStrategy: Send + Sync {
    /// Evaluate `condition` for `user_id`.
    ///
    /// # Errors
    ///
    /// - [`RewardError::Validation`]: the condition parameters are malformed
    /// - [`RewardError::TransientInfra`]: the log could not be read
    fn evaluate<'a>(
        &'a self,
        user_id: UserId,
        condition: &'a serde_json::Value,
        log: &'a dyn EventLogStore,
    ) -> BoxFuture<'a, Result<bool, RewardError>>;
}

/// Strategy map keyed by event type.
pub struct ConditionEvaluator {
    strategies: HashMap<EventType, Arc<dyn ConditionStrategy>>,
    log: Arc<dyn EventLogStore>,
    io_timeout: Duration,
}

impl ConditionEvaluator {
    /// An evaluator with no strategies registered.
    #[must_use]
    pub fn new(log: Arc<dyn EventLogStore>, io_timeout: Duration) -> Self {
        Self {
            strategies: HashMap::new(),
            log,
            io_timeout,
        }
    }

    /// An evaluator with a strategy for every built-in event type.
    #[must_use]
    pub fn with_builtin_strategies(
        log: Arc<dyn EventLogStore>,
        io_timeout: Duration,
        daily_login_max_gap_days: u32,
    ) -> Self {
        Self::new(log, io_timeout)
            .register(
                EventType::DailyLogin,
                Arc::new(DailyLoginStrategy::new(daily_login_max_gap_days)),
            )
            .register(EventType::InviteFriends, Arc::new(InviteFriendsStrategy))
            .register(EventType::QuestComplete, Arc::new(QuestCompleteStrategy))
            .register(EventType::LevelUp, Arc::new(LevelUpStrategy))
            .register(EventType::ProfileComplete, Arc::new(ProfileCompleteStrategy))
    }

    /// Register (or replace) the strategy for `event_type`.
    #[must_use]
    pub fn register(mut self, event_type: EventType, strategy: Arc<dyn ConditionStrategy>) -> Self {
        self.strategies.insert(event_type, strategy);
        self
    }

    /// Whether a strategy exists for `event_type`.
    #[must_use]
    pub fn supports(&self, event_type: &EventType) -> bool {
        self.strategies.contains_key(event_type)
    }

    /// Evaluate `event`'s condition for `user_id`.
    ///
    /// # Errors
    ///
    /// - [`RewardError::Validation`]: malformed condition parameters
    /// - [`RewardError::TransientInfra`]: log read failed or timed out
    pub async fn evaluate(
        &self,
        user_id: UserId,
        event: &EventDefinition,
    ) -> Result<Evaluation, RewardError> {
        let Some(strategy) = self.strategies.get(&event.event_type) else {
            tracing::debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                "No condition strategy registered"
            );
            return Ok(Evaluation::Unsupported);
        };

        let evaluation = strategy.evaluate(user_id, &event.condition, self.log.as_ref());
        let satisfied = tokio::time::timeout(self.io_timeout, evaluation)
            .await
            .map_err(|_| {
                RewardError::TransientInfra(format!(
                    "condition check for event {} timed out after {}ms",
                    event.id,
                    self.io_timeout.as_millis()
                ))
            })??;

        tracing::debug!(
            user_id = %user_id,
            event_id = %event.id,
            satisfied,
            "Evaluated event condition"
        );
        Ok(Evaluation::from_bool(satisfied))
    }
}

impl std::fmt::Debug for ConditionEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionEvaluator")
            .field("event_types", &self.strategies.keys().collect::<Vec<_>>())
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}

/// Decode a condition's parameters.
fn parse_condition<T: DeserializeOwned>(
    event_type: &EventType,
    condition: &serde_json::Value,
) -> Result<T, RewardError> {
    serde_json::from_value(condition.clone()).map_err(|e| {
        RewardError::Validation(format!("malformed {event_type} condition: {e}"))
    })
}
