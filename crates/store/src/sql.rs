// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of ddbsync.
//
// ddbsync is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// ddbsync is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with ddbsync. If not, see <https://www.gnu.org/licenses/>.

//! SQLite-based lock store implementation.
//!
//! Each logical table becomes one SQLite table:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS "<table>" (
//!   lock_key TEXT PRIMARY KEY,
//!   item TEXT NOT NULL
//! );
//! ```
//!
//! - `item` is the JSON-encoded [`Item`]
//! - the conditional insert is `INSERT .. ON CONFLICT(lock_key) DO NOTHING`
//! - the conditional delete reads and deletes inside one transaction
//!
//! Table names are interpolated into SQL, so they are restricted to
//! `[A-Za-z0-9_-]` and quoted.

use crate::{
    record_op, DeleteCondition, DeleteOutcome, Item, ItemKey, LockStore, PutOutcome, StoreError, StoreResult,
    TableSpec,
};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

const BACKEND: &str = "sqlite";

/// SQLite lock store.
///
/// `database_url` is any valid `sqlx` SQLite URL, e.g.:
/// - `sqlite::memory:` (in-memory, single connection)
/// - `sqlite://locks.db?mode=rwc`
#[derive(Clone)]
pub struct SqliteLockStore {
    pool: SqlitePool,
    initialized: Arc<RwLock<HashSet<String>>>,
}

impl SqliteLockStore {
    /// Connect to SQLite.
    #[instrument(skip(database_url))]
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        // Every connection to `:memory:` opens a separate database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Transport(format!("failed to connect SQLite: {e}")))?;

        debug!(max_connections, "SQLite lock store initialized");
        Ok(Self {
            pool,
            initialized: Arc::new(RwLock::new(HashSet::new())),
        })
    }

    fn validate_table(table: &str) -> StoreResult<()> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(())
        } else {
            Err(StoreError::InvalidTable(table.to_string()))
        }
    }

    /// Create the backing table on first use.
    async fn ensure_created(&self, table: &str) -> StoreResult<()> {
        Self::validate_table(table)?;
        if self.initialized.read().await.contains(table) {
            return Ok(());
        }

        let mut initialized = self.initialized.write().await;
        if initialized.contains(table) {
            return Ok(());
        }

        sqlx::query(&format!(
            r#"CREATE TABLE IF NOT EXISTS "{table}" (
                 lock_key TEXT PRIMARY KEY,
                 item TEXT NOT NULL
               )"#
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Transport(format!("failed to create table {table}: {e}")))?;

        initialized.insert(table.to_string());
        Ok(())
    }

    fn decode(json: &str) -> StoreResult<Item> {
        Ok(serde_json::from_str(json)?)
    }
}

#[async_trait]
impl LockStore for SqliteLockStore {
    #[instrument(skip(self, item), fields(table = %table, key = %key))]
    async fn put_if_absent(&self, table: &str, key: &ItemKey, item: Item) -> StoreResult<PutOutcome> {
        let started = std::time::Instant::now();
        self.ensure_created(table).await?;
        let json = serde_json::to_string(&item).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = sqlx::query(&format!(
            r#"INSERT INTO "{table}" (lock_key, item) VALUES (?1, ?2)
               ON CONFLICT(lock_key) DO NOTHING"#
        ))
        .bind(&key.value)
        .bind(json)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            record_op(BACKEND, "put_if_absent", "error", started);
            StoreError::from(e)
        })?;

        let outcome = if result.rows_affected() == 1 {
            PutOutcome::Inserted
        } else {
            PutOutcome::AlreadyExists
        };
        record_op(
            BACKEND,
            "put_if_absent",
            if outcome == PutOutcome::Inserted { "inserted" } else { "exists" },
            started,
        );
        Ok(outcome)
    }

    #[instrument(skip(self), fields(table = %table, key = %key))]
    async fn get(&self, table: &str, key: &ItemKey) -> StoreResult<Option<Item>> {
        let started = std::time::Instant::now();
        self.ensure_created(table).await?;

        let row = sqlx::query(&format!(r#"SELECT item FROM "{table}" WHERE lock_key = ?1"#))
            .bind(&key.value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                record_op(BACKEND, "get", "error", started);
                StoreError::from(e)
            })?;

        match row {
            Some(row) => {
                record_op(BACKEND, "get", "found", started);
                let json: String = row.get("item");
                Self::decode(&json).map(Some)
            }
            None => {
                record_op(BACKEND, "get", "not_found", started);
                Ok(None)
            }
        }
    }

    #[instrument(skip(self), fields(table = %table, key = %key))]
    async fn delete(&self, table: &str, key: &ItemKey) -> StoreResult<()> {
        let started = std::time::Instant::now();
        self.ensure_created(table).await?;

        sqlx::query(&format!(r#"DELETE FROM "{table}" WHERE lock_key = ?1"#))
            .bind(&key.value)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                record_op(BACKEND, "delete", "error", started);
                StoreError::from(e)
            })?;

        record_op(BACKEND, "delete", "ok", started);
        Ok(())
    }

    #[instrument(skip(self, condition), fields(table = %table, key = %key))]
    async fn delete_if(
        &self,
        table: &str,
        key: &ItemKey,
        condition: &DeleteCondition,
    ) -> StoreResult<DeleteOutcome> {
        let started = std::time::Instant::now();
        self.ensure_created(table).await?;

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(r#"SELECT item FROM "{table}" WHERE lock_key = ?1"#))
            .bind(&key.value)
            .fetch_optional(&mut *tx)
            .await?;

        let outcome = match row {
            None => DeleteOutcome::NotFound,
            Some(row) => {
                let json: String = row.get("item");
                let existing = Self::decode(&json)?;
                if condition.matches(&existing) {
                    sqlx::query(&format!(r#"DELETE FROM "{table}" WHERE lock_key = ?1"#))
                        .bind(&key.value)
                        .execute(&mut *tx)
                        .await?;
                    DeleteOutcome::Deleted
                } else {
                    DeleteOutcome::ConditionFailed
                }
            }
        };

        tx.commit().await?;

        let result = match outcome {
            DeleteOutcome::Deleted => "deleted",
            DeleteOutcome::NotFound => "not_found",
            DeleteOutcome::ConditionFailed => "condition_failed",
        };
        record_op(BACKEND, "delete_if", result, started);
        Ok(outcome)
    }

    async fn ensure_table(&self, spec: &TableSpec) -> StoreResult<()> {
        self.ensure_created(&spec.name).await
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
