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

//! # ddbsync Lock Store
//!
//! ## Purpose
//! The storage boundary underneath `ddbsync-mutex`. A lock is nothing more than
//! an item in a shared table; this crate defines the handful of atomic
//! operations the mutex needs from that table and adapts them to concrete
//! backends.
//!
//! ## Contract
//! - **Conditional insert** ([`LockStore::put_if_absent`]): the only
//!   synchronization primitive. Must be atomic: of N concurrent inserts for one
//!   key, exactly one observes [`PutOutcome::Inserted`].
//! - **Point lookup** ([`LockStore::get`]): absence is `Ok(None)`, never an error.
//! - **Delete** ([`LockStore::delete`]): idempotent.
//! - **Conditional delete** ([`LockStore::delete_if`]): removes the item only
//!   when a field still holds an expected value (fencing, safe pruning).
//!
//! Contention is reported through outcome enums. [`StoreError`] is reserved
//! for faults, so callers can retry transport errors without ever mistaking
//! them for "somebody else holds the lock".
//!
//! ## Consistency
//! Mutual exclusion is only as strong as the backend's conditional write.
//! DynamoDB conditional writes and SQLite transactions are strongly
//! consistent. An eventually-consistent backend would degrade the lock to a
//! best-effort guarantee.
//!
//! ## Backend Support
//! - **InMemory**: HashMap-based (always available, for testing)
//! - **DynamoDB**: Distributed, multi-node (feature: `ddb-backend`)
//! - **SQLite**: Persistent, single-host (feature: `sqlite-backend`)
//!
//! ## Examples
//! ```rust
//! use ddbsync_store::{InMemoryLockStore, Item, ItemKey, LockStore, PutOutcome};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryLockStore::new();
//! let key = ItemKey::new("id", "job-42");
//!
//! let first = store.put_if_absent("locks", &key, Item::new().with("id", "job-42")).await?;
//! assert_eq!(first, PutOutcome::Inserted);
//!
//! let second = store.put_if_absent("locks", &key, Item::new().with("id", "job-42")).await?;
//! assert_eq!(second, PutOutcome::AlreadyExists);
//!
//! store.delete("locks", &key).await?;
//! assert!(store.get("locks", &key).await?.is_none());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use async_trait::async_trait;

pub mod aws_config;
pub mod config;
pub mod error;
pub mod item;
pub mod memory;

#[cfg(feature = "ddb-backend")]
pub mod ddb;

#[cfg(feature = "sqlite-backend")]
pub mod sql;

pub use config::{create_store_from_config, create_store_from_env, BackendType, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use item::{AttrValue, Item, ItemKey, TableSpec};
pub use memory::{InMemoryLockStore, StoreOp};

#[cfg(feature = "ddb-backend")]
pub use ddb::DynamoDbLockStore;

#[cfg(feature = "sqlite-backend")]
pub use sql::SqliteLockStore;

/// Result of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// No item existed; ours is now stored
    Inserted,
    /// An item already exists for the key; nothing was written
    AlreadyExists,
}

/// Precondition for [`LockStore::delete_if`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteCondition {
    /// Delete only while `field` holds exactly `value`
    FieldEquals {
        /// Attribute name
        field: String,
        /// Expected value
        value: AttrValue,
    },
}

impl DeleteCondition {
    /// Shorthand for [`DeleteCondition::FieldEquals`].
    pub fn field_equals(field: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        DeleteCondition::FieldEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Evaluate the condition against an existing item.
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            DeleteCondition::FieldEquals { field, value } => item.field_equals(field, value),
        }
    }
}

/// Result of a conditional delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Item existed, condition held, item removed
    Deleted,
    /// No item existed for the key
    NotFound,
    /// Item exists but the condition did not hold; item left untouched
    ConditionFailed,
}

/// Conditional-write table abstraction used by distributed locks.
///
/// Implementations must be safe for concurrent use from many tasks and carry
/// no per-lock state: one store handle is shared by every mutex in a process.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Insert `item` under `key` only if no item exists for `key`.
    ///
    /// ## Returns
    /// - `Ok(PutOutcome::Inserted)`: item written
    /// - `Ok(PutOutcome::AlreadyExists)`: an item was already present
    /// - `Err(StoreError::Transport)`: backend fault, outcome unknown
    async fn put_if_absent(&self, table: &str, key: &ItemKey, item: Item) -> StoreResult<PutOutcome>;

    /// Point lookup.
    ///
    /// ## Returns
    /// - `Ok(Some(item))` if present
    /// - `Ok(None)` if absent
    async fn get(&self, table: &str, key: &ItemKey) -> StoreResult<Option<Item>>;

    /// Delete the item for `key`. Succeeds when the key is absent.
    async fn delete(&self, table: &str, key: &ItemKey) -> StoreResult<()>;

    /// Delete the item for `key` only if `condition` holds.
    async fn delete_if(
        &self,
        table: &str,
        key: &ItemKey,
        condition: &DeleteCondition,
    ) -> StoreResult<DeleteOutcome>;

    /// Create the table described by `spec` if the backend supports it.
    ///
    /// Idempotent. The default does nothing.
    async fn ensure_table(&self, _spec: &TableSpec) -> StoreResult<()> {
        Ok(())
    }

    /// Short backend name used in logs and metric labels.
    fn backend_name(&self) -> &'static str;
}

/// Record one store round trip in the shared store metrics.
pub(crate) fn record_op(backend: &'static str, op: &'static str, result: &'static str, started: std::time::Instant) {
    metrics::histogram!(
        "ddbsync_store_op_duration_seconds",
        "backend" => backend,
        "op" => op
    )
    .record(started.elapsed().as_secs_f64());
    metrics::counter!(
        "ddbsync_store_ops_total",
        "backend" => backend,
        "op" => op,
        "result" => result
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_condition_matches() {
        let item = Item::new().with("owner", "a").with("created", 10i64);
        assert!(DeleteCondition::field_equals("owner", "a").matches(&item));
        assert!(DeleteCondition::field_equals("created", 10i64).matches(&item));
        assert!(!DeleteCondition::field_equals("owner", "b").matches(&item));
        assert!(!DeleteCondition::field_equals("created", "10").matches(&item));
    }
}
