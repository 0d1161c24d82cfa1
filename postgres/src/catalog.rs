//! Event definitions and rewards.

use crate::{PostgresStore, db_error, decode_error};
use chrono::{DateTime, Utc};
use rewardflow_core::store::{BoxFuture, EventDefinitionStore, RewardStore, StoreError};
use rewardflow_core::types::{
    ApprovalMode, EventDefinition, EventId, EventStatus, EventType, Reward, RewardId, RewardType,
    UserId,
};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

const EVENT_COLUMNS: &str = "id, name, description, event_type, condition, start_date, end_date, \
     status, approval_mode, creator_id, created_at, updated_at";

const REWARD_COLUMNS: &str = "id, name, description, reward_type, value, quantity, event_id, \
     creator_id, created_at, updated_at";

fn event_from_row(row: &PgRow) -> Result<EventDefinition, StoreError> {
    let status: String = row.try_get("status").map_err(|e| decode_error("status", e))?;
    let approval_mode: String = row
        .try_get("approval_mode")
        .map_err(|e| decode_error("approval_mode", e))?;
    let event_type: String = row
        .try_get("event_type")
        .map_err(|e| decode_error("event_type", e))?;

    Ok(EventDefinition {
        id: EventId::from_uuid(row.try_get("id").map_err(|e| decode_error("id", e))?),
        name: row.try_get("name").map_err(|e| decode_error("name", e))?,
        description: row
            .try_get("description")
            .map_err(|e| decode_error("description", e))?,
        event_type: EventType::from(event_type),
        condition: row
            .try_get("condition")
            .map_err(|e| decode_error("condition", e))?,
        start_date: row
            .try_get("start_date")
            .map_err(|e| decode_error("start_date", e))?,
        end_date: row
            .try_get("end_date")
            .map_err(|e| decode_error("end_date", e))?,
        status: status
            .parse::<EventStatus>()
            .map_err(|e| decode_error("status", e))?,
        approval_mode: approval_mode
            .parse::<ApprovalMode>()
            .map_err(|e| decode_error("approval_mode", e))?,
        creator_id: UserId::from_uuid(
            row.try_get("creator_id")
                .map_err(|e| decode_error("creator_id", e))?,
        ),
        created_at: row
            .try_get("created_at")
            .map_err(|e| decode_error("created_at", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| decode_error("updated_at", e))?,
    })
}

fn reward_from_row(row: &PgRow) -> Result<Reward, StoreError> {
    let reward_type: String = row
        .try_get("reward_type")
        .map_err(|e| decode_error("reward_type", e))?;

    Ok(Reward {
        id: RewardId::from_uuid(row.try_get("id").map_err(|e| decode_error("id", e))?),
        name: row.try_get("name").map_err(|e| decode_error("name", e))?,
        description: row
            .try_get("description")
            .map_err(|e| decode_error("description", e))?,
        reward_type: RewardType::from(reward_type),
        value: row.try_get("value").map_err(|e| decode_error("value", e))?,
        quantity: row
            .try_get("quantity")
            .map_err(|e| decode_error("quantity", e))?,
        event_id: EventId::from_uuid(
            row.try_get("event_id")
                .map_err(|e| decode_error("event_id", e))?,
        ),
        creator_id: UserId::from_uuid(
            row.try_get("creator_id")
                .map_err(|e| decode_error("creator_id", e))?,
        ),
        created_at: row
            .try_get("created_at")
            .map_err(|e| decode_error("created_at", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| decode_error("updated_at", e))?,
    })
}

impl EventDefinitionStore for PostgresStore {
    fn insert(&self, event: EventDefinition) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO event_definitions (
                    id, name, description, event_type, condition, start_date, end_date,
                    status, approval_mode, creator_id, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ",
            )
            .bind(event.id.as_uuid())
            .bind(&event.name)
            .bind(&event.description)
            .bind(event.event_type.as_str())
            .bind(&event.condition)
            .bind(event.start_date)
            .bind(event.end_date)
            .bind(event.status.as_str())
            .bind(event.approval_mode.as_str())
            .bind(event.creator_id.as_uuid())
            .bind(event.created_at)
            .bind(event.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to insert event", e))?;
            Ok(())
        })
    }

    fn get(&self, id: EventId) -> BoxFuture<'_, Result<Option<EventDefinition>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {EVENT_COLUMNS} FROM event_definitions WHERE id = $1"
            ))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load event", e))?;

            row.as_ref().map(event_from_row).transpose()
        })
    }

    fn update_status(
        &self,
        id: EventId,
        status: EventStatus,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<EventDefinition, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE event_definitions SET status = $2, updated_at = $3 \
                 WHERE id = $1 RETURNING {EVENT_COLUMNS}"
            ))
            .bind(id.as_uuid())
            .bind(status.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to update event status", e))?
            .ok_or_else(|| StoreError::not_found("event", id))?;

            event_from_row(&row)
        })
    }

    fn list_active_by_type(
        &self,
        event_type: EventType,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<EventDefinition>, StoreError>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {EVENT_COLUMNS} FROM event_definitions \
                 WHERE event_type = $1 AND status = 'ACTIVE' \
                   AND start_date <= $2 AND end_date >= $2 \
                 ORDER BY created_at"
            ))
            .bind(event_type.as_str())
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list active events", e))?;

            rows.iter().map(event_from_row).collect()
        })
    }
}

impl RewardStore for PostgresStore {
    fn insert(&self, reward: Reward) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO rewards (
                    id, name, description, reward_type, value, quantity, event_id,
                    creator_id, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ",
            )
            .bind(reward.id.as_uuid())
            .bind(&reward.name)
            .bind(&reward.description)
            .bind(reward.reward_type.as_str())
            .bind(reward.value)
            .bind(reward.quantity)
            .bind(reward.event_id.as_uuid())
            .bind(reward.creator_id.as_uuid())
            .bind(reward.created_at)
            .bind(reward.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to insert reward", e))?;
            Ok(())
        })
    }

    fn get(&self, id: RewardId) -> BoxFuture<'_, Result<Option<Reward>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {REWARD_COLUMNS} FROM rewards WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("Failed to load reward", e))?;

            row.as_ref().map(reward_from_row).transpose()
        })
    }

    fn list_for_event(
        &self,
        event_id: EventId,
    ) -> BoxFuture<'_, Result<Vec<Reward>, StoreError>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {REWARD_COLUMNS} FROM rewards WHERE event_id = $1 ORDER BY created_at, id"
            ))
            .bind(event_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list rewards", e))?;

            rows.iter().map(reward_from_row).collect()
        })
    }

    fn decrement_if_available(
        &self,
        id: RewardId,
    ) -> BoxFuture<'_, Result<Reward, StoreError>> {
        Box::pin(async move {
            // Single conditional statement: concurrent callers serialize on the
            // row lock and the loser sees quantity = 0.
            let decremented = sqlx::query(&format!(
                "UPDATE rewards SET quantity = quantity - 1, updated_at = now() \
                 WHERE id = $1 AND quantity > 0 RETURNING {REWARD_COLUMNS}"
            ))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to decrement reward", e))?;

            if let Some(row) = decremented {
                return reward_from_row(&row);
            }

            let current = RewardStore::get(self, id)
                .await?
                .ok_or_else(|| StoreError::not_found("reward", id))?;

            if current.is_unlimited() {
                Ok(current)
            } else {
                Err(StoreError::OutOfStock {
                    reward_id: id.to_string(),
                })
            }
        })
    }

    fn set_quantity(
        &self,
        id: RewardId,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Reward, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE rewards SET quantity = $2, updated_at = $3 \
                 WHERE id = $1 RETURNING {REWARD_COLUMNS}"
            ))
            .bind(id.as_uuid())
            .bind(quantity)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to set reward quantity", e))?
            .ok_or_else(|| StoreError::not_found("reward", id))?;

            reward_from_row(&row)
        })
    }
}

/// Decode a nullable UUID column.
pub(crate) fn optional_uuid(row: &PgRow, column: &str) -> Result<Option<Uuid>, StoreError> {
    row.try_get::<Option<Uuid>, _>(column)
        .map_err(|e| decode_error(column, e))
}
