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

//! Store-backed distributed mutex.
//!
//! ## Protocol
//! - **Acquire**: conditional insert of a fresh record; rejected while any record exists
//! - **Release**: delete conditional on the holder's fencing token
//! - **Reclaim**: read the record, and if `now > expires` delete it conditional on
//!   the observed owner, so a newer record is never removed
//!
//! The conditional insert is the only arbitration point. Lookups are diagnostics.

use crate::clock::{Clock, SystemClock};
use crate::config::MutexOptions;
use crate::record::{FencingToken, LockKey, LockRecord};
use crate::{MutexError, MutexResult};
use chrono::{DateTime, Utc};
use ddbsync_store::{DeleteCondition, DeleteOutcome, ItemKey, LockStore, PutOutcome};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};

/// Stand-in deadline for timeouts too large to add to an `Instant` (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Proof of a successful acquisition.
///
/// Dropping a guard does not release the lock; call
/// [`DistributedMutex::unlock`] or [`LockGuard::release`]. An unreleased
/// lock is reclaimed once its TTL passes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "the lock stays held until unlocked or expired"]
pub struct LockGuard {
    record: LockRecord,
    token: FencingToken,
}

impl LockGuard {
    /// Locked key.
    pub fn key(&self) -> &LockKey {
        &self.record.key
    }

    /// Token that must match for release.
    pub fn fencing_token(&self) -> &FencingToken {
        &self.token
    }

    /// Record as written to the store.
    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Acquisition time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }

    /// Instant after which other callers may reclaim the lock.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.record.expires_at
    }

    /// Release through `mutex`.
    pub async fn release(self, mutex: &DistributedMutex) -> MutexResult<()> {
        mutex.unlock(&self).await
    }
}

/// Result of a single non-blocking acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TryLockOutcome {
    /// The lock is ours
    Acquired(LockGuard),
    /// Someone else holds the key
    AlreadyHeld,
}

impl TryLockOutcome {
    /// Guard if acquired.
    pub fn into_guard(self) -> Option<LockGuard> {
        match self {
            TryLockOutcome::Acquired(guard) => Some(guard),
            TryLockOutcome::AlreadyHeld => None,
        }
    }

    /// Whether the attempt succeeded.
    pub fn is_acquired(&self) -> bool {
        matches!(self, TryLockOutcome::Acquired(_))
    }
}

/// Handle for one lock key.
///
/// Cheap to clone; clones share the store and clock. Any number of handles,
/// in any number of processes, may contend on the same key.
#[derive(Clone)]
pub struct DistributedMutex {
    store: Arc<dyn LockStore>,
    key: LockKey,
    item_key: ItemKey,
    options: MutexOptions,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for DistributedMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedMutex")
            .field("backend", &self.store.backend_name())
            .field("key", &self.key)
            .field("options", &self.options)
            .field("clock", &self.clock)
            .finish()
    }
}

impl DistributedMutex {
    /// Mutex on `key` with lifetime `ttl` and default options. Does not touch the store.
    pub fn new(store: Arc<dyn LockStore>, key: impl Into<String>, ttl: Duration) -> MutexResult<Self> {
        Self::with_options(store, key, MutexOptions::with_ttl(ttl))
    }

    /// Mutex on `key` with explicit options.
    pub fn with_options(store: Arc<dyn LockStore>, key: impl Into<String>, options: MutexOptions) -> MutexResult<Self> {
        options.validate()?;
        let key = LockKey::new(key)?;
        let item_key = options.schema.item_key(&key);
        Ok(Self {
            store,
            key,
            item_key,
            options,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the wall-clock source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Locked key.
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Lock lifetime.
    pub fn ttl(&self) -> Duration {
        self.options.ttl
    }

    /// Active options.
    pub fn options(&self) -> &MutexOptions {
        &self.options
    }

    /// Provision the lock table on backends that support it.
    #[instrument(skip(self), fields(table = %self.options.schema.table))]
    pub async fn ensure_table(&self) -> MutexResult<()> {
        self.store
            .ensure_table(&self.options.schema.table_spec())
            .await
            .map_err(|e| MutexError::from_store("ensure_table", 1, e))
    }

    /// Block until the lock is acquired or `lock_timeout` passes.
    pub async fn lock(&self) -> MutexResult<LockGuard> {
        self.lock_with_timeout(self.options.lock_timeout).await
    }

    /// Block until the lock is acquired or `timeout` passes.
    ///
    /// Each attempt reclaims an expired record (best effort), then tries the
    /// conditional insert. Contention backs off with jitter, never past the
    /// deadline. A store fault on the insert fails immediately.
    ///
    /// ## Returns
    /// - `Ok(LockGuard)`: lock acquired
    /// - `Err(MutexError::Timeout)`: key stayed held until the deadline
    /// - `Err(MutexError::Transport)`: backend fault during the insert
    #[instrument(skip(self), fields(lock_key = %self.key, timeout_ms = timeout.as_millis() as u64))]
    pub async fn lock_with_timeout(&self, timeout: Duration) -> MutexResult<LockGuard> {
        let started = Instant::now();
        let deadline = started.checked_add(timeout).unwrap_or_else(|| started + FAR_FUTURE);
        let mut attempt: u32 = 0;

        loop {
            if let Err(e) = self.prune(false).await {
                warn!(lock_key = %self.key, error = %e, "Failed to prune expired lock, continuing");
                metrics::counter!("ddbsync_mutex_prune_errors_total").increment(1);
            }

            match self.insert().await {
                Ok(Some(guard)) => {
                    let waited = started.elapsed();
                    metrics::histogram!("ddbsync_mutex_lock_wait_seconds").record(waited.as_secs_f64());
                    metrics::counter!("ddbsync_mutex_lock_total", "result" => "acquired").increment(1);
                    debug!(
                        lock_key = %self.key,
                        fencing_token = %guard.token,
                        attempts = attempt + 1,
                        waited_ms = waited.as_millis() as u64,
                        "Lock acquired"
                    );
                    return Ok(guard);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(lock_key = %self.key, error = %e, "Lock attempt failed");
                    metrics::counter!("ddbsync_mutex_lock_total", "result" => "error").increment(1);
                    return Err(e);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                let waited = now - started;
                metrics::counter!("ddbsync_mutex_lock_total", "result" => "timeout").increment(1);
                debug!(lock_key = %self.key, attempts = attempt + 1, "Timed out waiting for lock");
                return Err(MutexError::Timeout {
                    key: self.key.to_string(),
                    waited,
                });
            }

            let delay = self
                .options
                .backoff
                .delay(attempt)
                .min(deadline.saturating_duration_since(now));
            attempt = attempt.saturating_add(1);
            tokio::time::sleep(delay).await;
        }
    }

    /// One conditional insert, no waiting and no pruning.
    #[instrument(skip(self), fields(lock_key = %self.key))]
    pub async fn try_lock(&self) -> MutexResult<TryLockOutcome> {
        match self.insert().await {
            Ok(Some(guard)) => {
                metrics::counter!("ddbsync_mutex_try_lock_total", "result" => "acquired").increment(1);
                debug!(lock_key = %self.key, fencing_token = %guard.token, "Lock acquired");
                Ok(TryLockOutcome::Acquired(guard))
            }
            Ok(None) => {
                metrics::counter!("ddbsync_mutex_try_lock_total", "result" => "held").increment(1);
                Ok(TryLockOutcome::AlreadyHeld)
            }
            Err(e) => {
                error!(lock_key = %self.key, error = %e, "Try-lock failed");
                metrics::counter!("ddbsync_mutex_try_lock_total", "result" => "error").increment(1);
                Err(e)
            }
        }
    }

    /// Release the lock held by `guard`.
    ///
    /// ## Returns
    /// - `Ok(())`: released, or already gone
    /// - `Err(MutexError::NotOwner)`: the key is now held under another token
    /// - `Err(MutexError::Transport)`: backend fault after bounded retries
    #[instrument(skip(self, guard), fields(lock_key = %self.key, fencing_token = %guard.token))]
    pub async fn unlock(&self, guard: &LockGuard) -> MutexResult<()> {
        if guard.key() != &self.key {
            return Err(MutexError::InvalidKey(format!(
                "guard for '{}' cannot release '{}'",
                guard.key(),
                self.key
            )));
        }

        let table = self.options.schema.table.as_str();
        let item_key = &self.item_key;
        let condition = DeleteCondition::field_equals(&self.options.schema.owner_field, guard.token.as_str());
        let condition = &condition;
        let store = &self.store;

        let outcome = self
            .options
            .retry
            .run("delete_if", self.key.as_str(), move || store.delete_if(table, item_key, condition))
            .await
            .map_err(|e| {
                error!(lock_key = %self.key, error = %e, "Unlock failed");
                metrics::counter!("ddbsync_mutex_unlock_total", "result" => "error").increment(1);
                e
            })?;

        match outcome {
            DeleteOutcome::Deleted => {
                metrics::counter!("ddbsync_mutex_unlock_total", "result" => "released").increment(1);
                debug!(lock_key = %self.key, "Lock released");
                Ok(())
            }
            DeleteOutcome::NotFound => {
                metrics::counter!("ddbsync_mutex_unlock_total", "result" => "absent").increment(1);
                debug!(lock_key = %self.key, "Lock already released");
                Ok(())
            }
            DeleteOutcome::ConditionFailed => {
                metrics::counter!("ddbsync_mutex_unlock_total", "result" => "not_owner").increment(1);
                warn!(lock_key = %self.key, "Lock is held by another owner, leaving it in place");
                Err(MutexError::NotOwner {
                    key: self.key.to_string(),
                })
            }
        }
    }

    /// Delete the record whoever holds it. For operator recovery only.
    #[instrument(skip(self), fields(lock_key = %self.key))]
    pub async fn force_unlock(&self) -> MutexResult<()> {
        let table = self.options.schema.table.as_str();
        let item_key = &self.item_key;
        let store = &self.store;

        self.options
            .retry
            .run("delete", self.key.as_str(), move || store.delete(table, item_key))
            .await?;

        metrics::counter!("ddbsync_mutex_unlock_total", "result" => "forced").increment(1);
        warn!(lock_key = %self.key, "Lock force-released");
        Ok(())
    }

    /// Reclaim the record if it has expired.
    ///
    /// ## Returns
    /// - `Ok(true)`: an expired record was deleted
    /// - `Ok(false)`: nothing to reclaim (absent, unexpired, or replaced meanwhile)
    #[instrument(skip(self), fields(lock_key = %self.key))]
    pub async fn prune_expired(&self) -> MutexResult<bool> {
        self.prune(true).await
    }

    /// Whether an unexpired record exists. Diagnostic only; never use to decide
    /// whether to write.
    #[instrument(skip(self), fields(lock_key = %self.key))]
    pub async fn exists(&self) -> MutexResult<bool> {
        let now = self.clock.now();
        Ok(self
            .current_record()
            .await?
            .map(|record| !record.is_expired_at(now))
            .unwrap_or(false))
    }

    /// Stored record, expired or not.
    pub async fn current_record(&self) -> MutexResult<Option<LockRecord>> {
        self.fetch(&self.options.retry).await
    }

    async fn fetch(&self, retry: &crate::RetryPolicy) -> MutexResult<Option<LockRecord>> {
        let table = self.options.schema.table.as_str();
        let item_key = &self.item_key;
        let store = &self.store;

        let item = retry
            .run("get", self.key.as_str(), move || store.get(table, item_key))
            .await?;

        item.map(|item| LockRecord::from_item(&item, &self.options.schema))
            .transpose()
    }

    /// `with_retries == false` makes one try per store call; the lock loop
    /// retries on its own schedule.
    async fn prune(&self, with_retries: bool) -> MutexResult<bool> {
        let single;
        let retry = if with_retries {
            &self.options.retry
        } else {
            single = crate::RetryPolicy::none();
            &single
        };

        let record = match self.fetch(retry).await? {
            Some(record) => record,
            None => return Ok(false),
        };

        let now = self.clock.now();
        if !record.is_expired_at(now) {
            return Ok(false);
        }

        let schema = &self.options.schema;
        let condition = match &record.owner {
            Some(owner) => DeleteCondition::field_equals(&schema.owner_field, owner.as_str()),
            None => DeleteCondition::field_equals(&schema.created_field, record.created_at.timestamp_millis()),
        };
        let condition = &condition;
        let table = schema.table.as_str();
        let item_key = &self.item_key;
        let store = &self.store;

        let outcome = retry
            .run("delete_if", self.key.as_str(), move || store.delete_if(table, item_key, condition))
            .await?;

        let reclaimed = outcome == DeleteOutcome::Deleted;
        let result = match outcome {
            DeleteOutcome::Deleted => "reclaimed",
            DeleteOutcome::NotFound => "absent",
            DeleteOutcome::ConditionFailed => "replaced",
        };
        metrics::counter!("ddbsync_mutex_prune_total", "result" => result).increment(1);
        if reclaimed {
            debug!(
                lock_key = %self.key,
                expired_at = %record.expires_at,
                owner = ?record.owner.as_ref().map(FencingToken::as_str),
                "Reclaimed expired lock"
            );
        }
        Ok(reclaimed)
    }

    /// One conditional insert. `Ok(None)` means the key is held.
    async fn insert(&self) -> MutexResult<Option<LockGuard>> {
        let token = FencingToken::generate();
        let record = LockRecord::new(self.key.clone(), self.clock.now(), self.options.ttl, Some(token.clone()))?;
        let item = record.to_item(&self.options.schema)?;

        match self
            .store
            .put_if_absent(&self.options.schema.table, &self.item_key, item)
            .await
        {
            Ok(PutOutcome::Inserted) => Ok(Some(LockGuard { record, token })),
            Ok(PutOutcome::AlreadyExists) => Ok(None),
            Err(e) => Err(MutexError::from_store("put_if_absent", 1, e)),
        }
    }
}
