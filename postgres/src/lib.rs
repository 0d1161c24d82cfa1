//! `PostgreSQL` storage for the reward pipeline.
//!
//! [`PostgresStore`] implements every store trait from `rewardflow-core` on a
//! single connection pool; [`PostgresStepJournal`] persists workflow step
//! outputs so memoization survives worker restarts.
//!
//! The atomic operations map onto single statements:
//!
//! - inventory decrement: `UPDATE … WHERE quantity > 0 RETURNING …`
//! - idempotent insert: `INSERT … ON CONFLICT (idempotency_key) DO NOTHING`
//! - status transition: `UPDATE … WHERE id = $1 AND status = $expected`
//!
//! # Example
//!
//! ```no_run
//! use rewardflow_postgres::{PoolSettings, PostgresStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresStore::connect("postgres://localhost/rewards", &PoolSettings::default()).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod catalog;
mod event_log;
mod journal;
mod requests;

pub use journal::PostgresStepJournal;

use rewardflow_core::StoreError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Connection pool sizing.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum open connections
    pub max_connections: u32,
    /// Connections kept open while idle
    pub min_connections: u32,
    /// How long to wait for a connection
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Store backed by a `PostgreSQL` pool. Cheap to clone.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, settings: &PoolSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;

        tracing::info!(
            max_connections = settings.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self::new(pool))
    }

    /// Apply the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map a driver error onto the store taxonomy.
fn db_error(context: &str, error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Database(db_err)
            if db_err.is_unique_violation()
                || db_err.is_foreign_key_violation()
                || db_err.is_check_violation() =>
        {
            StoreError::Constraint(format!("{context}: {db_err}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::TypeNotFound { .. } => {
            StoreError::Serialization(format!("{context}: {error}"))
        }
        _ => StoreError::Unavailable(format!("{context}: {error}")),
    }
}

/// Map a decode failure for a single column.
fn decode_error(column: &str, error: impl std::fmt::Display) -> StoreError {
    StoreError::Serialization(format!("column {column}: {error}"))
}
