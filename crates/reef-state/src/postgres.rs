//! PostgreSQL hook store

use crate::store::{merge_registrations, HookKey, HookRegistrationRow, HookRow, HookStore, UpsertOutcome};
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, trace};

/// Durable table name
pub const TABLE_NAME: &str = "plugin_hooks";

const COLUMNS: &str = "plugin, event, table_name, priority, wildcard, handler, plugin_version, \
                       approved, disabled, approved_by, approved_at";

/// PostgreSQL hook store
#[derive(Clone)]
pub struct PostgresHookStore {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresHookStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresHookStore")
            .field("table", &TABLE_NAME)
            .finish()
    }
}

impl PostgresHookStore {
    /// Connect and create the table if needed
    pub async fn connect(url: &str, pool_size: u32, timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(timeout)
            .connect(url)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;

        debug!(table = TABLE_NAME, "PostgreSQL hook store connected");
        Ok(store)
    }

    /// Use an existing pool; the schema must already exist
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the table if it does not exist
    pub async fn init_schema(&self) -> Result<()> {
        let query = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                plugin TEXT NOT NULL,
                event TEXT NOT NULL,
                table_name TEXT NOT NULL,
                priority BIGINT NOT NULL DEFAULT 100,
                wildcard BOOLEAN NOT NULL DEFAULT FALSE,
                handler TEXT NOT NULL,
                plugin_version TEXT NOT NULL,
                approved BOOLEAN NOT NULL DEFAULT FALSE,
                disabled BOOLEAN NOT NULL DEFAULT FALSE,
                approved_by TEXT,
                approved_at TIMESTAMPTZ,
                UNIQUE (plugin, event, table_name)
            )
            "#,
            table = TABLE_NAME
        );

        sqlx::query(&query).execute(&self.pool).await?;
        debug!(table = TABLE_NAME, "Schema initialized");
        Ok(())
    }

    fn decode(row: &PgRow) -> Result<HookRow> {
        Ok(HookRow {
            plugin: row.try_get("plugin")?,
            event: row.try_get("event")?,
            table_name: row.try_get("table_name")?,
            priority: row.try_get("priority")?,
            wildcard: row.try_get("wildcard")?,
            handler: row.try_get("handler")?,
            plugin_version: row.try_get("plugin_version")?,
            approved: row.try_get("approved")?,
            disabled: row.try_get("disabled")?,
            approved_by: row.try_get("approved_by")?,
            approved_at: row.try_get("approved_at")?,
        })
    }
}

#[async_trait]
impl HookStore for PostgresHookStore {
    async fn upsert_hook_registrations(
        &self,
        plugin: &str,
        version: &str,
        registrations: &[HookRegistrationRow],
    ) -> Result<UpsertOutcome> {
        trace!(plugin, version, "PostgreSQL UPSERT hooks");
        let mut tx = self.pool.begin().await?;

        let query = format!(
            "SELECT {} FROM {} WHERE plugin = $1 ORDER BY event, table_name FOR UPDATE",
            COLUMNS, TABLE_NAME
        );
        let existing = sqlx::query(&query)
            .bind(plugin)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(Self::decode)
            .collect::<Result<Vec<_>>>()?;

        let (merged, revoked) = merge_registrations(plugin, version, &existing, registrations);

        let query = format!("DELETE FROM {} WHERE plugin = $1", TABLE_NAME);
        sqlx::query(&query).bind(plugin).execute(&mut *tx).await?;

        let query = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            TABLE_NAME, COLUMNS
        );
        for row in &merged {
            sqlx::query(&query)
                .bind(&row.plugin)
                .bind(&row.event)
                .bind(&row.table_name)
                .bind(row.priority)
                .bind(row.wildcard)
                .bind(&row.handler)
                .bind(&row.plugin_version)
                .bind(row.approved)
                .bind(row.disabled)
                .bind(&row.approved_by)
                .bind(row.approved_at)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        debug!(plugin, version, rows = merged.len(), revoked, "Hook rows replaced");
        Ok(UpsertOutcome {
            rows: merged.len(),
            revoked,
        })
    }

    async fn cleanup_orphaned_hooks(&self, discovered: &[String]) -> Result<u64> {
        let result = if discovered.is_empty() {
            let query = format!("DELETE FROM {}", TABLE_NAME);
            sqlx::query(&query).execute(&self.pool).await?
        } else {
            let query = format!("DELETE FROM {} WHERE NOT (plugin = ANY($1))", TABLE_NAME);
            sqlx::query(&query)
                .bind(discovered)
                .execute(&self.pool)
                .await?
        };

        let removed = result.rows_affected();
        if removed > 0 {
            debug!(removed, "Orphaned hook rows removed");
        }
        Ok(removed)
    }

    async fn set_approval(&self, key: &HookKey, approved: bool, actor: &str) -> Result<bool> {
        trace!(hook = %key, approved, "PostgreSQL SET APPROVAL");
        let query = format!(
            r#"
            UPDATE {}
            SET approved = $4,
                approved_by = CASE WHEN $4 THEN $5 ELSE NULL END,
                approved_at = CASE WHEN $4 THEN NOW() ELSE NULL END
            WHERE plugin = $1 AND event = $2 AND table_name = $3
            "#,
            TABLE_NAME
        );

        let result = sqlx::query(&query)
            .bind(&key.plugin)
            .bind(&key.event)
            .bind(&key.table_name)
            .bind(approved)
            .bind(actor)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_disabled(&self, key: &HookKey, disabled: bool) -> Result<bool> {
        trace!(hook = %key, disabled, "PostgreSQL SET DISABLED");
        let query = format!(
            "UPDATE {} SET disabled = $4 WHERE plugin = $1 AND event = $2 AND table_name = $3",
            TABLE_NAME
        );

        let result = sqlx::query(&query)
            .bind(&key.plugin)
            .bind(&key.event)
            .bind(&key.table_name)
            .bind(disabled)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_hooks(&self) -> Result<Vec<HookRow>> {
        let query = format!(
            "SELECT {} FROM {} ORDER BY plugin, event, table_name",
            COLUMNS, TABLE_NAME
        );
        sqlx::query(&query)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(Self::decode)
            .collect()
    }

    async fn list_plugin_hooks(&self, plugin: &str) -> Result<Vec<HookRow>> {
        let query = format!(
            "SELECT {} FROM {} WHERE plugin = $1 ORDER BY event, table_name",
            COLUMNS, TABLE_NAME
        );
        sqlx::query(&query)
            .bind(plugin)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(Self::decode)
            .collect()
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
