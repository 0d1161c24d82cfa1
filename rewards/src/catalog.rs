//! Event definitions and the rewards attached to them.

use chrono::{DateTime, Utc};
use rewardflow_core::RewardError;
use rewardflow_core::environment::Clock;
use rewardflow_core::store::{EventDefinitionStore, RewardStore};
use rewardflow_core::types::{
    ApprovalMode, EventDefinition, EventId, EventStatus, EventType, Reward, RewardId, RewardType,
    UserId,
};
use serde::Deserialize;
use std::sync::Arc;

/// Operator input for a new event definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    /// Display name
    pub name: String,
    /// Display description
    #[serde(default)]
    pub description: String,
    /// Which user action the event reacts to
    pub event_type: EventType,
    /// Strategy parameters
    #[serde(default)]
    pub condition: serde_json::Value,
    /// Window start
    pub start_date: DateTime<Utc>,
    /// Window end, after `start_date`
    pub end_date: DateTime<Utc>,
    /// Auto or manual approval
    pub approval_mode: ApprovalMode,
    /// Operator creating the event
    pub creator_id: UserId,
}

/// Operator input for a new reward.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReward {
    /// Owning event
    pub event_id: EventId,
    /// Display name
    pub name: String,
    /// Display description
    #[serde(default)]
    pub description: String,
    /// Kind of reward
    pub reward_type: RewardType,
    /// Amount granted per claim
    pub value: i64,
    /// Initial stock; −1 for unlimited
    pub quantity: i64,
    /// Operator creating the reward
    pub creator_id: UserId,
}

/// Lookup and administration of events and rewards.
#[derive(Clone)]
pub struct Catalog {
    events: Arc<dyn EventDefinitionStore>,
    rewards: Arc<dyn RewardStore>,
    clock: Arc<dyn Clock>,
}

impl Catalog {
    /// Create a catalog over the given stores.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventDefinitionStore>,
        rewards: Arc<dyn RewardStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            events,
            rewards,
            clock,
        }
    }

    /// Load an event definition.
    ///
    /// # Errors
    ///
    /// - [`RewardError::NotFound`]: no such event
    /// - [`RewardError::TransientInfra`]: store failure
    pub async fn find_event(&self, id: EventId) -> Result<EventDefinition, RewardError> {
        self.events
            .get(id)
            .await?
            .ok_or_else(|| RewardError::not_found("event", id))
    }

    /// Whether the event currently accepts requests, with the definition.
    ///
    /// Active means status ACTIVE and now within `[start, end]`.
    ///
    /// # Errors
    ///
    /// - [`RewardError::NotFound`]: no such event
    /// - [`RewardError::TransientInfra`]: store failure
    pub async fn is_event_active(
        &self,
        id: EventId,
    ) -> Result<(bool, EventDefinition), RewardError> {
        let event = self.find_event(id).await?;
        Ok((event.is_active_at(self.clock.now()), event))
    }

    /// Rewards of an event, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::TransientInfra`] on store failure.
    pub async fn find_rewards_for_event(&self, id: EventId) -> Result<Vec<Reward>, RewardError> {
        Ok(self.rewards.list_for_event(id).await?)
    }

    /// Events of `event_type` accepting requests right now.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::TransientInfra`] on store failure.
    pub async fn active_events_of_type(
        &self,
        event_type: EventType,
    ) -> Result<Vec<EventDefinition>, RewardError> {
        Ok(self
            .events
            .list_active_by_type(event_type, self.clock.now())
            .await?)
    }

    /// Create an ACTIVE event definition.
    ///
    /// # Errors
    ///
    /// - [`RewardError::Validation`]: blank name or window not ending after it starts
    /// - [`RewardError::TransientInfra`]: store failure
    pub async fn create_event(&self, input: NewEvent) -> Result<EventDefinition, RewardError> {
        let now = self.clock.now();
        let event = EventDefinition {
            id: EventId::new(),
            name: input.name,
            description: input.description,
            event_type: input.event_type,
            condition: input.condition,
            start_date: input.start_date,
            end_date: input.end_date,
            status: EventStatus::Active,
            approval_mode: input.approval_mode,
            creator_id: input.creator_id,
            created_at: now,
            updated_at: now,
        };
        event.validate()?;

        self.events.insert(event.clone()).await?;
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            approval_mode = ?event.approval_mode,
            "Event created"
        );
        Ok(event)
    }

    /// Activate or deactivate an event. Past requests are unaffected.
    ///
    /// # Errors
    ///
    /// - [`RewardError::NotFound`]: no such event
    /// - [`RewardError::TransientInfra`]: store failure
    pub async fn update_event_status(
        &self,
        id: EventId,
        status: EventStatus,
    ) -> Result<EventDefinition, RewardError> {
        let event = self
            .events
            .update_status(id, status, self.clock.now())
            .await?;
        tracing::info!(event_id = %id, status = ?status, "Event status updated");
        Ok(event)
    }

    /// Attach a new reward to an existing event.
    ///
    /// # Errors
    ///
    /// - [`RewardError::NotFound`]: no such event
    /// - [`RewardError::Validation`]: blank name or quantity below −1
    /// - [`RewardError::TransientInfra`]: store failure
    pub async fn create_reward(&self, input: NewReward) -> Result<Reward, RewardError> {
        self.find_event(input.event_id).await?;

        let now = self.clock.now();
        let reward = Reward {
            id: RewardId::new(),
            name: input.name,
            description: input.description,
            reward_type: input.reward_type,
            value: input.value,
            quantity: input.quantity,
            event_id: input.event_id,
            creator_id: input.creator_id,
            created_at: now,
            updated_at: now,
        };
        reward.validate()?;

        self.rewards.insert(reward.clone()).await?;
        tracing::info!(
            reward_id = %reward.id,
            event_id = %reward.event_id,
            quantity = reward.quantity,
            "Reward created"
        );
        Ok(reward)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").finish_non_exhaustive()
    }
}
