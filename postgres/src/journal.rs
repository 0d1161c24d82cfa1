//! Durable step journal.

use rewardflow_core::BoxFuture;
use rewardflow_runtime::dispatcher::{StepJournal, WorkflowError};
use sqlx::PgPool;
use uuid::Uuid;

/// Step outputs stored in the `workflow_steps` table.
///
/// Recording the same step twice keeps the first output, so a redelivered run
/// racing an earlier attempt cannot overwrite a result already replayed.
#[derive(Clone, Debug)]
pub struct PostgresStepJournal {
    pool: PgPool,
}

impl PostgresStepJournal {
    /// Create a journal on `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl StepJournal for PostgresStepJournal {
    fn load<'a>(
        &'a self,
        run_id: Uuid,
        step: &'a str,
    ) -> BoxFuture<'a, Result<Option<serde_json::Value>, WorkflowError>> {
        Box::pin(async move {
            sqlx::query_scalar::<_, serde_json::Value>(
                "SELECT output FROM workflow_steps WHERE run_id = $1 AND step = $2",
            )
            .bind(run_id)
            .bind(step)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| WorkflowError::Journal(format!("Failed to load step {step}: {e}")))
        })
    }

    fn record<'a>(
        &'a self,
        run_id: Uuid,
        step: &'a str,
        output: serde_json::Value,
    ) -> BoxFuture<'a, Result<(), WorkflowError>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO workflow_steps (run_id, step, output)
                VALUES ($1, $2, $3)
                ON CONFLICT (run_id, step) DO NOTHING
                ",
            )
            .bind(run_id)
            .bind(step)
            .bind(output)
            .execute(&self.pool)
            .await
            .map_err(|e| WorkflowError::Journal(format!("Failed to record step {step}: {e}")))?;
            Ok(())
        })
    }
}
