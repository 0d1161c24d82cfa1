//! In-memory implementation of every store trait.
//!
//! Each table sits behind its own mutex; the atomic operations run entirely
//! under one lock, which gives the same guarantees the `PostgreSQL` store gets
//! from conditional statements.

use chrono::{DateTime, Utc};
use rewardflow_core::IdempotencyKey;
use rewardflow_core::store::{
    BoxFuture, EventDefinitionStore, EventLogStore, InsertOutcome, RewardRequestStore,
    RewardStore, StoreError,
};
use rewardflow_core::types::{
    AuditNote, EventDefinition, EventId, EventLogEntry, EventStatus, EventType, RequestId,
    RequestStatus, Reward, RewardId, RewardRequest, UserId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct Faults {
    event_log_unavailable: AtomicBool,
    event_log_delay: Mutex<Option<Duration>>,
    inventory_unavailable: AtomicBool,
    failing_transitions: AtomicUsize,
}

#[derive(Debug, Default)]
struct Requests {
    by_id: HashMap<RequestId, RewardRequest>,
    by_key: HashMap<IdempotencyKey, RequestId>,
}

/// Thread-safe in-memory store with fault injection.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    events: Mutex<HashMap<EventId, EventDefinition>>,
    rewards: Mutex<Vec<Reward>>,
    log: Mutex<Vec<EventLogEntry>>,
    requests: Mutex<Requests>,
    faults: Faults,
    decrements: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an event definition directly.
    pub fn seed_event(&self, event: EventDefinition) {
        lock(&self.events).insert(event.id, event);
    }

    /// Insert a reward directly.
    pub fn seed_reward(&self, reward: Reward) {
        lock(&self.rewards).push(reward);
    }

    /// Append log entries directly.
    pub fn seed_log(&self, entries: impl IntoIterator<Item = EventLogEntry>) {
        lock(&self.log).extend(entries);
    }

    /// Current stored quantity of a reward.
    #[must_use]
    pub fn quantity(&self, id: RewardId) -> Option<i64> {
        lock(&self.rewards)
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.quantity)
    }

    /// Number of stored reward requests.
    #[must_use]
    pub fn request_count(&self) -> usize {
        lock(&self.requests).by_id.len()
    }

    /// Number of successful decrements of limited rewards.
    #[must_use]
    pub fn decrement_count(&self) -> usize {
        self.decrements.load(Ordering::SeqCst)
    }

    /// Number of stored log entries.
    #[must_use]
    pub fn log_len(&self) -> usize {
        lock(&self.log).len()
    }

    /// Make event log reads and writes fail with `Unavailable`.
    pub fn set_event_log_unavailable(&self, unavailable: bool) {
        self.faults
            .event_log_unavailable
            .store(unavailable, Ordering::SeqCst);
    }

    /// Delay every event log call.
    pub fn set_event_log_delay(&self, delay: Option<Duration>) {
        *lock(&self.faults.event_log_delay) = delay;
    }

    /// Make inventory decrements fail with `Unavailable`.
    pub fn set_inventory_unavailable(&self, unavailable: bool) {
        self.faults
            .inventory_unavailable
            .store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` status transitions with `Unavailable`.
    pub fn fail_next_transitions(&self, count: usize) {
        self.faults.failing_transitions.store(count, Ordering::SeqCst);
    }

    async fn event_log_gate(&self) -> Result<(), StoreError> {
        let delay = *lock(&self.faults.event_log_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.faults.event_log_unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("event log unavailable".to_string()));
        }
        Ok(())
    }

    fn take_transition_fault(&self) -> bool {
        self.faults
            .failing_transitions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl EventDefinitionStore for InMemoryStore {
    fn insert(&self, event: EventDefinition) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut events = lock(&self.events);
            if events.contains_key(&event.id) {
                return Err(StoreError::Constraint(format!("event {} exists", event.id)));
            }
            events.insert(event.id, event);
            Ok(())
        })
    }

    fn get(&self, id: EventId) -> BoxFuture<'_, Result<Option<EventDefinition>, StoreError>> {
        Box::pin(async move { Ok(lock(&self.events).get(&id).cloned()) })
    }

    fn update_status(
        &self,
        id: EventId,
        status: EventStatus,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<EventDefinition, StoreError>> {
        Box::pin(async move {
            let mut events = lock(&self.events);
            let event = events
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found("event", id))?;
            event.status = status;
            event.updated_at = now;
            Ok(event.clone())
        })
    }

    fn list_active_by_type(
        &self,
        event_type: EventType,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<EventDefinition>, StoreError>> {
        Box::pin(async move {
            let mut active: Vec<_> = lock(&self.events)
                .values()
                .filter(|e| e.event_type == event_type && e.is_active_at(now))
                .cloned()
                .collect();
            active.sort_by_key(|e| e.created_at);
            Ok(active)
        })
    }
}

impl RewardStore for InMemoryStore {
    fn insert(&self, reward: Reward) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            if !lock(&self.events).contains_key(&reward.event_id) {
                return Err(StoreError::Constraint(format!(
                    "reward references unknown event {}",
                    reward.event_id
                )));
            }
            let mut rewards = lock(&self.rewards);
            if rewards.iter().any(|r| r.id == reward.id) {
                return Err(StoreError::Constraint(format!("reward {} exists", reward.id)));
            }
            rewards.push(reward);
            Ok(())
        })
    }

    fn get(&self, id: RewardId) -> BoxFuture<'_, Result<Option<Reward>, StoreError>> {
        Box::pin(async move { Ok(lock(&self.rewards).iter().find(|r| r.id == id).cloned()) })
    }

    fn list_for_event(
        &self,
        event_id: EventId,
    ) -> BoxFuture<'_, Result<Vec<Reward>, StoreError>> {
        Box::pin(async move {
            let mut rewards: Vec<_> = lock(&self.rewards)
                .iter()
                .filter(|r| r.event_id == event_id)
                .cloned()
                .collect();
            rewards.sort_by_key(|r| r.created_at);
            Ok(rewards)
        })
    }

    fn decrement_if_available(
        &self,
        id: RewardId,
    ) -> BoxFuture<'_, Result<Reward, StoreError>> {
        Box::pin(async move {
            if self.faults.inventory_unavailable.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("inventory unavailable".to_string()));
            }
            let mut rewards = lock(&self.rewards);
            let reward = rewards
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| StoreError::not_found("reward", id))?;

            if reward.is_unlimited() {
                return Ok(reward.clone());
            }
            if reward.quantity <= 0 {
                return Err(StoreError::OutOfStock {
                    reward_id: id.to_string(),
                });
            }
            reward.quantity -= 1;
            self.decrements.fetch_add(1, Ordering::SeqCst);
            Ok(reward.clone())
        })
    }

    fn set_quantity(
        &self,
        id: RewardId,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Reward, StoreError>> {
        Box::pin(async move {
            let mut rewards = lock(&self.rewards);
            let reward = rewards
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| StoreError::not_found("reward", id))?;
            reward.quantity = quantity;
            reward.updated_at = now;
            Ok(reward.clone())
        })
    }
}

impl EventLogStore for InMemoryStore {
    fn append(&self, entry: EventLogEntry) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.event_log_gate().await?;
            let mut log = lock(&self.log);
            if !log.iter().any(|e| e.id == entry.id) {
                log.push(entry);
            }
            Ok(())
        })
    }

    fn entries(
        &self,
        user_id: UserId,
        event_type: EventType,
    ) -> BoxFuture<'_, Result<Vec<EventLogEntry>, StoreError>> {
        Box::pin(async move {
            self.event_log_gate().await?;
            let mut entries: Vec<_> = lock(&self.log)
                .iter()
                .filter(|e| e.user_id == user_id && e.event_type == event_type)
                .cloned()
                .collect();
            entries.sort_by_key(|e| e.timestamp);
            Ok(entries)
        })
    }

    fn latest(
        &self,
        user_id: UserId,
        event_type: EventType,
    ) -> BoxFuture<'_, Result<Option<EventLogEntry>, StoreError>> {
        Box::pin(async move {
            self.event_log_gate().await?;
            Ok(lock(&self.log)
                .iter()
                .filter(|e| e.user_id == user_id && e.event_type == event_type)
                .max_by_key(|e| e.timestamp)
                .cloned())
        })
    }
}

impl RewardRequestStore for InMemoryStore {
    fn insert_unique(
        &self,
        request: RewardRequest,
    ) -> BoxFuture<'_, Result<InsertOutcome, StoreError>> {
        Box::pin(async move {
            let mut requests = lock(&self.requests);
            if let Some(existing) = requests
                .by_key
                .get(&request.idempotency_key)
                .and_then(|id| requests.by_id.get(id))
            {
                return Ok(InsertOutcome::Existing(existing.clone()));
            }
            requests
                .by_key
                .insert(request.idempotency_key.clone(), request.id);
            requests.by_id.insert(request.id, request.clone());
            Ok(InsertOutcome::Inserted(request))
        })
    }

    fn get(&self, id: RequestId) -> BoxFuture<'_, Result<Option<RewardRequest>, StoreError>> {
        Box::pin(async move { Ok(lock(&self.requests).by_id.get(&id).cloned()) })
    }

    fn find_by_key(
        &self,
        key: IdempotencyKey,
    ) -> BoxFuture<'_, Result<Option<RewardRequest>, StoreError>> {
        Box::pin(async move {
            let requests = lock(&self.requests);
            Ok(requests
                .by_key
                .get(&key)
                .and_then(|id| requests.by_id.get(id))
                .cloned())
        })
    }

    fn find_active(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> BoxFuture<'_, Result<Option<RewardRequest>, StoreError>> {
        Box::pin(async move {
            Ok(lock(&self.requests)
                .by_id
                .values()
                .filter(|r| r.user_id == user_id && r.event_id == event_id && r.status.is_active())
                .min_by_key(|r| r.created_at)
                .cloned())
        })
    }

    fn list_for_user(
        &self,
        user_id: UserId,
    ) -> BoxFuture<'_, Result<Vec<RewardRequest>, StoreError>> {
        Box::pin(async move {
            let mut requests: Vec<_> = lock(&self.requests)
                .by_id
                .values()
                .filter(|r| r.user_id == user_id)
                .cloned()
                .collect();
            requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(requests)
        })
    }

    fn transition(
        &self,
        updated: RewardRequest,
        expected: RequestStatus,
    ) -> BoxFuture<'_, Result<RewardRequest, StoreError>> {
        Box::pin(async move {
            if self.take_transition_fault() {
                return Err(StoreError::Unavailable(
                    "injected transition failure".to_string(),
                ));
            }
            let mut requests = lock(&self.requests);
            let stored = requests
                .by_id
                .get_mut(&updated.id)
                .ok_or_else(|| StoreError::not_found("request", updated.id))?;
            if stored.status != expected {
                return Err(StoreError::StatusMismatch {
                    expected,
                    actual: stored.status,
                });
            }
            // Audit notes are append-only and never replaced by a transition.
            let notes = std::mem::take(&mut stored.notes);
            *stored = RewardRequest { notes, ..updated };
            Ok(stored.clone())
        })
    }

    fn append_note(
        &self,
        id: RequestId,
        note: AuditNote,
    ) -> BoxFuture<'_, Result<RewardRequest, StoreError>> {
        Box::pin(async move {
            let mut requests = lock(&self.requests);
            let stored = requests
                .by_id
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found("request", id))?;
            stored.notes.push(note);
            Ok(stored.clone())
        })
    }
}
