//! PostgreSQL lock store.
//!
//! Acquisition is a conditional insert, so it is atomic across all
//! orchestrator instances sharing the database. No TTL is assumed: a
//! crashed run's lock stays until released by a retriggered run with the
//! same holder or by `terraflow unlock`.

use async_trait::async_trait;
use sqlx::PgPool;
use terraflow_core::lock::{LockOutcome, LockStore};
use terraflow_core::{Error, Result};

pub struct PgLockStore {
    pool: PgPool,
}

impl PgLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the lock table if it does not exist.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resource_locks (
                resource TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                locked_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}

fn storage_err(e: sqlx::Error) -> Error {
    Error::Internal(format!("lock store: {e}"))
}

#[async_trait]
impl LockStore for PgLockStore {
    async fn try_lock(&self, resource: &str, holder: &str) -> Result<LockOutcome> {
        // The holder can release between our insert and select; one more
        // attempt resolves that window.
        for _ in 0..2 {
            let inserted = sqlx::query(
                r#"
                INSERT INTO resource_locks (resource, holder)
                VALUES ($1, $2)
                ON CONFLICT (resource) DO NOTHING
                "#,
            )
            .bind(resource)
            .bind(holder)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

            if inserted.rows_affected() == 1 {
                return Ok(LockOutcome::Granted);
            }

            let current: Option<(String,)> =
                sqlx::query_as("SELECT holder FROM resource_locks WHERE resource = $1")
                    .bind(resource)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(storage_err)?;

            match current {
                Some((current_holder,)) if current_holder == holder => {
                    return Ok(LockOutcome::Granted);
                }
                Some((current_holder,)) => {
                    return Ok(LockOutcome::Held {
                        holder: current_holder,
                    });
                }
                None => continue,
            }
        }

        Err(Error::Internal(format!(
            "lock store: could not settle acquisition of {resource}"
        )))
    }

    async fn unlock(&self, resource: &str, holder: &str) -> Result<bool> {
        let deleted =
            sqlx::query("DELETE FROM resource_locks WHERE resource = $1 AND holder = $2")
                .bind(resource)
                .bind(holder)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        Ok(deleted.rows_affected() == 1)
    }

    async fn holder(&self, resource: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT holder FROM resource_locks WHERE resource = $1")
                .bind(resource)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_err)?;
        Ok(row.map(|(holder,)| holder))
    }

    async fn force_unlock(&self, resource: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM resource_locks WHERE resource = $1")
            .bind(resource)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(deleted.rows_affected() == 1)
    }
}
