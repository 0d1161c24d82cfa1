//! Reward request records.

use crate::catalog::optional_uuid;
use crate::{PostgresStore, db_error, decode_error};
use rewardflow_core::IdempotencyKey;
use rewardflow_core::store::{BoxFuture, InsertOutcome, RewardRequestStore, StoreError};
use rewardflow_core::types::{
    ActorId, AuditNote, EventId, RequestId, RequestStatus, RewardId, RewardRequest, UserId,
};
use sqlx::Row;
use sqlx::postgres::PgRow;

const REQUEST_COLUMNS: &str = "id, user_id, event_id, reward_id, status, idempotency_key, \
     message, processed_at, processed_by, notes, created_at, updated_at";

fn request_from_row(row: &PgRow) -> Result<RewardRequest, StoreError> {
    let status: String = row.try_get("status").map_err(|e| decode_error("status", e))?;
    let key: String = row
        .try_get("idempotency_key")
        .map_err(|e| decode_error("idempotency_key", e))?;
    let processed_by: Option<String> = row
        .try_get("processed_by")
        .map_err(|e| decode_error("processed_by", e))?;
    let notes: serde_json::Value = row.try_get("notes").map_err(|e| decode_error("notes", e))?;

    Ok(RewardRequest {
        id: RequestId::from_uuid(row.try_get("id").map_err(|e| decode_error("id", e))?),
        user_id: UserId::from_uuid(
            row.try_get("user_id")
                .map_err(|e| decode_error("user_id", e))?,
        ),
        event_id: EventId::from_uuid(
            row.try_get("event_id")
                .map_err(|e| decode_error("event_id", e))?,
        ),
        reward_id: optional_uuid(row, "reward_id")?.map(RewardId::from_uuid),
        status: status
            .parse::<RequestStatus>()
            .map_err(|e| decode_error("status", e))?,
        idempotency_key: IdempotencyKey::from_trusted(key),
        message: row
            .try_get("message")
            .map_err(|e| decode_error("message", e))?,
        processed_at: row
            .try_get("processed_at")
            .map_err(|e| decode_error("processed_at", e))?,
        processed_by: processed_by.map(ActorId::from_raw),
        created_at: row
            .try_get("created_at")
            .map_err(|e| decode_error("created_at", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| decode_error("updated_at", e))?,
        notes: serde_json::from_value::<Vec<AuditNote>>(notes)
            .map_err(|e| decode_error("notes", e))?,
    })
}

fn notes_json(notes: &[AuditNote]) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(notes).map_err(|e| StoreError::Serialization(e.to_string()))
}

impl PostgresStore {
    async fn load_status(&self, id: RequestId) -> Result<Option<RequestStatus>, StoreError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM reward_requests WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("Failed to load request status", e))?;

        status
            .map(|s| s.parse::<RequestStatus>())
            .transpose()
            .map_err(|e| decode_error("status", e))
    }
}

impl RewardRequestStore for PostgresStore {
    fn insert_unique(
        &self,
        request: RewardRequest,
    ) -> BoxFuture<'_, Result<InsertOutcome, StoreError>> {
        Box::pin(async move {
            let inserted = sqlx::query(&format!(
                "INSERT INTO reward_requests ( \
                    id, user_id, event_id, reward_id, status, idempotency_key, message, \
                    processed_at, processed_by, notes, created_at, updated_at \
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
                 ON CONFLICT (idempotency_key) DO NOTHING \
                 RETURNING {REQUEST_COLUMNS}"
            ))
            .bind(request.id.as_uuid())
            .bind(request.user_id.as_uuid())
            .bind(request.event_id.as_uuid())
            .bind(request.reward_id.map(|id| *id.as_uuid()))
            .bind(request.status.as_str())
            .bind(request.idempotency_key.as_str())
            .bind(&request.message)
            .bind(request.processed_at)
            .bind(request.processed_by.as_ref().map(ActorId::as_str))
            .bind(notes_json(&request.notes)?)
            .bind(request.created_at)
            .bind(request.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to insert reward request", e))?;

            if let Some(row) = inserted {
                return Ok(InsertOutcome::Inserted(request_from_row(&row)?));
            }

            // Lost the race on the unique key: read back the winner's row.
            let existing = self
                .find_by_key(request.idempotency_key.clone())
                .await?
                .ok_or_else(|| {
                    StoreError::Unavailable(format!(
                        "idempotency key {} conflicted but no row is visible",
                        request.idempotency_key
                    ))
                })?;
            tracing::debug!(
                request_id = %existing.id,
                "Idempotency key already claimed, returning existing request"
            );
            Ok(InsertOutcome::Existing(existing))
        })
    }

    fn get(&self, id: RequestId) -> BoxFuture<'_, Result<Option<RewardRequest>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {REQUEST_COLUMNS} FROM reward_requests WHERE id = $1"
            ))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load reward request", e))?;

            row.as_ref().map(request_from_row).transpose()
        })
    }

    fn find_by_key(
        &self,
        key: IdempotencyKey,
    ) -> BoxFuture<'_, Result<Option<RewardRequest>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {REQUEST_COLUMNS} FROM reward_requests WHERE idempotency_key = $1"
            ))
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to look up idempotency key", e))?;

            row.as_ref().map(request_from_row).transpose()
        })
    }

    fn find_active(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> BoxFuture<'_, Result<Option<RewardRequest>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {REQUEST_COLUMNS} FROM reward_requests \
                 WHERE user_id = $1 AND event_id = $2 AND status IN ('PENDING', 'APPROVED') \
                 ORDER BY created_at LIMIT 1"
            ))
            .bind(user_id.as_uuid())
            .bind(event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to find active request", e))?;

            row.as_ref().map(request_from_row).transpose()
        })
    }

    fn list_for_user(
        &self,
        user_id: UserId,
    ) -> BoxFuture<'_, Result<Vec<RewardRequest>, StoreError>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {REQUEST_COLUMNS} FROM reward_requests \
                 WHERE user_id = $1 ORDER BY created_at DESC"
            ))
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list reward requests", e))?;

            rows.iter().map(request_from_row).collect()
        })
    }

    fn transition(
        &self,
        updated: RewardRequest,
        expected: RequestStatus,
    ) -> BoxFuture<'_, Result<RewardRequest, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE reward_requests \
                 SET reward_id = $2, status = $3, message = $4, processed_at = $5, \
                     processed_by = $6, updated_at = $7 \
                 WHERE id = $1 AND status = $8 \
                 RETURNING {REQUEST_COLUMNS}"
            ))
            .bind(updated.id.as_uuid())
            .bind(updated.reward_id.map(|id| *id.as_uuid()))
            .bind(updated.status.as_str())
            .bind(&updated.message)
            .bind(updated.processed_at)
            .bind(updated.processed_by.as_ref().map(ActorId::as_str))
            .bind(updated.updated_at)
            .bind(expected.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to transition reward request", e))?;

            if let Some(row) = row {
                return request_from_row(&row);
            }

            match self.load_status(updated.id).await? {
                None => Err(StoreError::not_found("request", updated.id)),
                Some(actual) => Err(StoreError::StatusMismatch { expected, actual }),
            }
        })
    }

    fn append_note(
        &self,
        id: RequestId,
        note: AuditNote,
    ) -> BoxFuture<'_, Result<RewardRequest, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE reward_requests SET notes = notes || $2::jsonb \
                 WHERE id = $1 RETURNING {REQUEST_COLUMNS}"
            ))
            .bind(id.as_uuid())
            .bind(notes_json(std::slice::from_ref(&note))?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to append audit note", e))?
            .ok_or_else(|| StoreError::not_found("request", id))?;

            request_from_row(&row)
        })
    }
}
