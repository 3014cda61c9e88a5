//! Postgres-backed durable store.
//!
//! One row per queue in `command_queues`. A save is a single upsert, so a
//! reader sees either the previous payload or the new one.
//!
//! The store interface is synchronous (it is called from the executor
//! thread), so the store owns a small current-thread runtime to drive sqlx.
//! Do not call it from inside another tokio runtime.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::runtime::Runtime;
use tracing::{debug, instrument};

use super::{DurableStore, StoreError, validate_name};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS command_queues (
    name TEXT PRIMARY KEY,
    payload BYTEA NOT NULL,
    saved_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub struct PostgresDurableStore {
    pool: PgPool,
    runtime: Runtime,
}

impl std::fmt::Debug for PostgresDurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDurableStore").finish_non_exhaustive()
    }
}

impl PostgresDurableStore {
    /// Connect and make sure the table exists.
    pub fn connect(database_url: &str) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Unavailable(format!("failed to start runtime: {e}")))?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(2)
                    .connect(database_url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self { pool, runtime };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.runtime
            .block_on(sqlx::query(SCHEMA).execute(&self.pool))
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

impl DurableStore for PostgresDurableStore {
    #[instrument(skip(self), err)]
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_name(name)?;
        let row = self
            .runtime
            .block_on(
                sqlx::query("SELECT payload FROM command_queues WHERE name = $1")
                    .bind(name)
                    .fetch_optional(&self.pool),
            )
            .map_err(|e| map_sqlx_error("read", e))?;

        match row {
            Some(row) => {
                let payload: Vec<u8> = row
                    .try_get("payload")
                    .map_err(|e| StoreError::Corrupt(format!("payload column: {e}")))?;
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, blob), fields(bytes = blob.len()), err)]
    fn write(&self, name: &str, blob: &[u8]) -> Result<(), StoreError> {
        validate_name(name)?;
        self.runtime
            .block_on(
                sqlx::query(
                    r#"
                    INSERT INTO command_queues (name, payload, saved_at)
                    VALUES ($1, $2, NOW())
                    ON CONFLICT (name)
                    DO UPDATE SET payload = EXCLUDED.payload, saved_at = EXCLUDED.saved_at
                    "#,
                )
                .bind(name)
                .bind(blob)
                .execute(&self.pool),
            )
            .map_err(|e| map_sqlx_error("write", e))?;
        debug!(queue = name, "queue row upserted");
        Ok(())
    }

    #[instrument(skip(self), err)]
    fn remove(&self, name: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        self.runtime
            .block_on(
                sqlx::query("DELETE FROM command_queues WHERE name = $1")
                    .bind(name)
                    .execute(&self.pool),
            )
            .map_err(|e| map_sqlx_error("remove", e))?;
        Ok(())
    }
}

fn map_sqlx_error(operation: &str, error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("{operation}: {error}"))
        }
        other => StoreError::Io(format!("{operation}: {other}")),
    }
}
