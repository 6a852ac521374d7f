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

//! In-memory lock store implementation (for testing).

use crate::{record_op, DeleteCondition, DeleteOutcome, Item, ItemKey, LockStore, PutOutcome, StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

const BACKEND: &str = "memory";

/// Store operation, used to target fault injection and read call counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// [`LockStore::put_if_absent`]
    PutIfAbsent,
    /// [`LockStore::get`]
    Get,
    /// [`LockStore::delete`]
    Delete,
    /// [`LockStore::delete_if`]
    DeleteIf,
}

impl StoreOp {
    fn index(self) -> usize {
        match self {
            StoreOp::PutIfAbsent => 0,
            StoreOp::Get => 1,
            StoreOp::Delete => 2,
            StoreOp::DeleteIf => 3,
        }
    }
}

/// In-memory lock store (for testing).
///
/// ## Purpose
/// Provides a HashMap-backed implementation of [`LockStore`] for tests and
/// single-process use. Conditional operations run under one write lock, so
/// they are atomic with respect to each other.
///
/// ## Fault injection
/// [`fail_next`](Self::fail_next) makes the next N calls of an operation fail
/// with [`StoreError::Transport`] before touching state, which lets tests
/// drive the retry and fail-fast paths deterministically.
///
/// ## Limitations
/// - Not persistent (items lost on drop)
/// - Not distributed (clones share state, separate instances do not)
#[derive(Clone, Default)]
pub struct InMemoryLockStore {
    items: Arc<RwLock<HashMap<(String, String), Item>>>,
    faults: Arc<Mutex<HashMap<StoreOp, u32>>>,
    calls: Arc<[AtomicU64; 4]>,
}

impl InMemoryLockStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls of `op` with a transport error.
    pub async fn fail_next(&self, op: StoreOp, count: u32) {
        let mut faults = self.faults.lock().await;
        *faults.entry(op).or_insert(0) += count;
    }

    /// Number of calls made to `op`, including injected failures.
    pub fn calls(&self, op: StoreOp) -> u64 {
        self.calls[op.index()].load(Ordering::SeqCst)
    }

    /// Number of items currently stored across all tables.
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    /// Whether the store holds no items.
    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    async fn enter(&self, op: StoreOp) -> StoreResult<()> {
        self.calls[op.index()].fetch_add(1, Ordering::SeqCst);
        let mut faults = self.faults.lock().await;
        if let Some(remaining) = faults.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Transport(format!("injected {:?} failure", op)));
            }
        }
        Ok(())
    }

    fn slot(table: &str, key: &ItemKey) -> (String, String) {
        (table.to_string(), key.value.clone())
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn put_if_absent(&self, table: &str, key: &ItemKey, item: Item) -> StoreResult<PutOutcome> {
        let started = std::time::Instant::now();
        self.enter(StoreOp::PutIfAbsent).await?;

        let mut items = self.items.write().await;
        let slot = Self::slot(table, key);
        let outcome = if items.contains_key(&slot) {
            PutOutcome::AlreadyExists
        } else {
            items.insert(slot, item);
            PutOutcome::Inserted
        };
        drop(items);

        debug!(table = %table, key = %key, ?outcome, "memory put_if_absent");
        record_op(BACKEND, "put_if_absent", if outcome == PutOutcome::Inserted { "inserted" } else { "exists" }, started);
        Ok(outcome)
    }

    async fn get(&self, table: &str, key: &ItemKey) -> StoreResult<Option<Item>> {
        let started = std::time::Instant::now();
        self.enter(StoreOp::Get).await?;

        let item = self.items.read().await.get(&Self::slot(table, key)).cloned();
        record_op(BACKEND, "get", if item.is_some() { "found" } else { "not_found" }, started);
        Ok(item)
    }

    async fn delete(&self, table: &str, key: &ItemKey) -> StoreResult<()> {
        let started = std::time::Instant::now();
        self.enter(StoreOp::Delete).await?;

        self.items.write().await.remove(&Self::slot(table, key));
        record_op(BACKEND, "delete", "ok", started);
        Ok(())
    }

    async fn delete_if(
        &self,
        table: &str,
        key: &ItemKey,
        condition: &DeleteCondition,
    ) -> StoreResult<DeleteOutcome> {
        let started = std::time::Instant::now();
        self.enter(StoreOp::DeleteIf).await?;

        let mut items = self.items.write().await;
        let slot = Self::slot(table, key);
        let outcome = match items.get(&slot) {
            None => DeleteOutcome::NotFound,
            Some(existing) if condition.matches(existing) => {
                items.remove(&slot);
                DeleteOutcome::Deleted
            }
            Some(_) => DeleteOutcome::ConditionFailed,
        };
        drop(items);

        let result = match outcome {
            DeleteOutcome::Deleted => "deleted",
            DeleteOutcome::NotFound => "not_found",
            DeleteOutcome::ConditionFailed => "condition_failed",
        };
        record_op(BACKEND, "delete_if", result, started);
        Ok(outcome)
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
