//! Reward inventory.
//!
//! Wraps the [`RewardStore`] with a bounded timeout per call. Stock only ever
//! changes through [`InventoryService::decrement_if_available`] or an explicit
//! admin quantity update.

use chrono::{DateTime, Utc};
use rewardflow_core::RewardError;
use rewardflow_core::store::{RewardStore, StoreError};
use rewardflow_core::types::{Reward, RewardId, validate_quantity};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Timed access to reward stock.
#[derive(Clone)]
pub struct InventoryService {
    rewards: Arc<dyn RewardStore>,
    timeout: Duration,
}

impl InventoryService {
    /// Create a service whose calls give up after `timeout`.
    #[must_use]
    pub fn new(rewards: Arc<dyn RewardStore>, timeout: Duration) -> Self {
        Self { rewards, timeout }
    }

    /// Load a reward.
    ///
    /// # Errors
    ///
    /// - [`RewardError::NotFound`]: no such reward
    /// - [`RewardError::TransientInfra`]: store failure or timeout
    pub async fn find_by_id(&self, id: RewardId) -> Result<Reward, RewardError> {
        self.bounded("find reward", self.rewards.get(id))
            .await?
            .ok_or_else(|| RewardError::not_found("reward", id))
    }

    /// Take one unit of stock.
    ///
    /// Unlimited rewards come back unchanged; limited ones are decremented by
    /// a single conditional update in the store.
    ///
    /// # Errors
    ///
    /// - [`RewardError::OutOfStock`]: no stock left
    /// - [`RewardError::NotFound`]: no such reward
    /// - [`RewardError::TransientInfra`]: store failure or timeout
    pub async fn decrement_if_available(&self, id: RewardId) -> Result<Reward, RewardError> {
        let result = self
            .bounded("decrement reward", self.rewards.decrement_if_available(id))
            .await;

        let label = match &result {
            Ok(reward) if reward.is_unlimited() => "unlimited",
            Ok(_) => "success",
            Err(RewardError::OutOfStock { .. }) => "out_of_stock",
            Err(_) => "error",
        };
        metrics::counter!("rewards_inventory_decrements_total", "result" => label).increment(1);

        match &result {
            Ok(reward) => tracing::debug!(
                reward_id = %id,
                remaining = reward.quantity,
                "Reward stock taken"
            ),
            Err(e) => tracing::debug!(reward_id = %id, error = %e, "Reward stock not taken"),
        }
        result
    }

    /// Administrative overwrite of a reward's stock.
    ///
    /// # Errors
    ///
    /// - [`RewardError::Validation`]: quantity below −1
    /// - [`RewardError::NotFound`]: no such reward
    /// - [`RewardError::TransientInfra`]: store failure or timeout
    pub async fn set_quantity(
        &self,
        id: RewardId,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> Result<Reward, RewardError> {
        validate_quantity(quantity)?;
        let reward = self
            .bounded("set reward quantity", self.rewards.set_quantity(id, quantity, now))
            .await?;
        tracing::info!(reward_id = %id, quantity, "Reward quantity updated");
        Ok(reward)
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, RewardError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                RewardError::TransientInfra(format!(
                    "{operation} timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })?
            .map_err(RewardError::from)
    }
}

impl std::fmt::Debug for InventoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryService")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use rewardflow_core::environment::Clock;
    use rewardflow_core::types::{ApprovalMode, EventType, Reward};
    use rewardflow_testing::{InMemoryStore, fixtures, test_clock};

    fn seeded(quantity: i64) -> (Arc<InMemoryStore>, Reward) {
        let now = test_clock().now();
        let store = Arc::new(InMemoryStore::new());
        let event = fixtures::event(EventType::DailyLogin, ApprovalMode::Auto, now);
        let reward = fixtures::reward(event.id, quantity, now);
        store.seed_event(event);
        store.seed_reward(reward.clone());
        (store, reward)
    }

    #[tokio::test]
    async fn last_unit_then_out_of_stock() {
        let (store, reward) = seeded(1);
        let inventory = InventoryService::new(store.clone(), Duration::from_secs(1));

        let after = inventory.decrement_if_available(reward.id).await.unwrap();
        assert_eq!(after.quantity, 0);

        let err = inventory.decrement_if_available(reward.id).await.unwrap_err();
        assert!(matches!(err, RewardError::OutOfStock { .. }));
        assert_eq!(store.quantity(reward.id), Some(0));
    }

    #[tokio::test]
    async fn unlimited_stock_is_never_touched() {
        let (store, reward) = seeded(Reward::UNLIMITED);
        let inventory = InventoryService::new(store.clone(), Duration::from_secs(1));

        for _ in 0..3 {
            inventory.decrement_if_available(reward.id).await.unwrap();
        }
        assert_eq!(store.quantity(reward.id), Some(Reward::UNLIMITED));
        assert_eq!(store.decrement_count(), 0);
    }

    #[tokio::test]
    async fn unknown_reward_is_not_found() {
        let (store, _) = seeded(1);
        let inventory = InventoryService::new(store, Duration::from_secs(1));

        let err = inventory.find_by_id(RewardId::new()).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn store_outage_is_transient() {
        let (store, reward) = seeded(3);
        store.set_inventory_unavailable(true);
        let inventory = InventoryService::new(store.clone(), Duration::from_secs(1));

        let err = inventory.decrement_if_available(reward.id).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.quantity(reward.id), Some(3));
    }

    #[tokio::test]
    async fn quantity_below_unlimited_sentinel_is_rejected() {
        let (store, reward) = seeded(3);
        let inventory = InventoryService::new(store, Duration::from_secs(1));

        let err = inventory
            .set_quantity(reward.id, -2, test_clock().now())
            .await
            .unwrap_err();
        assert!(matches!(err, RewardError::Validation(_)));
    }
}
