//! Append-only event log.

use crate::{PostgresStore, db_error, decode_error};
use rewardflow_core::store::{BoxFuture, EventLogStore, StoreError};
use rewardflow_core::types::{EventLogEntry, EventType, LogEntryId, UserId};
use sqlx::Row;
use sqlx::postgres::PgRow;

fn entry_from_row(row: &PgRow) -> Result<EventLogEntry, StoreError> {
    let event_type: String = row
        .try_get("event_type")
        .map_err(|e| decode_error("event_type", e))?;

    Ok(EventLogEntry {
        id: LogEntryId::from_uuid(row.try_get("id").map_err(|e| decode_error("id", e))?),
        user_id: UserId::from_uuid(
            row.try_get("user_id")
                .map_err(|e| decode_error("user_id", e))?,
        ),
        event_type: EventType::from(event_type),
        data: row.try_get("data").map_err(|e| decode_error("data", e))?,
        timestamp: row
            .try_get("occurred_at")
            .map_err(|e| decode_error("occurred_at", e))?,
    })
}

impl EventLogStore for PostgresStore {
    fn append(&self, entry: EventLogEntry) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO event_log (id, user_id, event_type, data, occurred_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO NOTHING
                ",
            )
            .bind(entry.id.as_uuid())
            .bind(entry.user_id.as_uuid())
            .bind(entry.event_type.as_str())
            .bind(&entry.data)
            .bind(entry.timestamp)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to append log entry", e))?;

            tracing::debug!(
                user_id = %entry.user_id,
                event_type = %entry.event_type,
                "Appended event log entry"
            );
            Ok(())
        })
    }

    fn entries(
        &self,
        user_id: UserId,
        event_type: EventType,
    ) -> BoxFuture<'_, Result<Vec<EventLogEntry>, StoreError>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT id, user_id, event_type, data, occurred_at
                FROM event_log
                WHERE user_id = $1 AND event_type = $2
                ORDER BY occurred_at ASC
                ",
            )
            .bind(user_id.as_uuid())
            .bind(event_type.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to read event log", e))?;

            rows.iter().map(entry_from_row).collect()
        })
    }

    fn latest(
        &self,
        user_id: UserId,
        event_type: EventType,
    ) -> BoxFuture<'_, Result<Option<EventLogEntry>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, user_id, event_type, data, occurred_at
                FROM event_log
                WHERE user_id = $1 AND event_type = $2
                ORDER BY occurred_at DESC
                LIMIT 1
                ",
            )
            .bind(user_id.as_uuid())
            .bind(event_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to read latest log entry", e))?;

            row.as_ref().map(entry_from_row).transpose()
        })
    }
}
