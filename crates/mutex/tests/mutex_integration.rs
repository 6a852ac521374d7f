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

//! Distributed mutex integration tests against the in-memory store.
//!
//! ## Test Coverage
//! - Mutual exclusion under concurrent acquisition
//! - Blocking acquisition, release, and re-acquisition
//! - TTL expiry and reclamation without unlock
//! - Deadlines, transport fail-fast, bounded release retries
//! - Fencing: stale guards and reclaim races

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ddbsync_mutex::{
    DistributedMutex, FencingToken, LockKey, LockRecord, ManualClock, MutexError, MutexOptions, TableSchema,
    TryLockOutcome,
};
use ddbsync_store::{
    DeleteCondition, DeleteOutcome, InMemoryLockStore, Item, ItemKey, LockStore, PutOutcome, StoreOp, StoreResult,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn t0() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap()
}

/// Two "processes" contending on one key: separate handles, shared store and clock.
fn two_processes(ttl: Duration) -> (InMemoryLockStore, ManualClock, DistributedMutex, DistributedMutex) {
    let store = InMemoryLockStore::new();
    let clock = ManualClock::new(t0());
    let make = || {
        DistributedMutex::new(Arc::new(store.clone()), "job-42", ttl)
            .unwrap()
            .with_clock(Arc::new(clock.clone()))
    };
    let a = make();
    let b = make();
    (store, clock, a, b)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_winner_among_racing_callers() {
    init_tracing();
    let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());

    let mut handles = Vec::new();
    for _ in 0..32 {
        let mutex = DistributedMutex::new(store.clone(), "race", Duration::from_secs(30)).unwrap();
        handles.push(tokio::spawn(async move { mutex.try_lock().await }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_acquired() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(start_paused = true)]
async fn test_lock_blocks_then_succeeds_after_release() {
    init_tracing();
    let (_store, _clock, a, b) = two_processes(Duration::from_secs(60));
    let guard_a = a.lock().await.unwrap();

    let waiter = tokio::spawn(async move { b.lock_with_timeout(Duration::from_secs(10)).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!waiter.is_finished());

    a.unlock(&guard_a).await.unwrap();
    let guard_b = waiter.await.unwrap().unwrap();
    assert_ne!(guard_b.fencing_token(), guard_a.fencing_token());
}

#[tokio::test(start_paused = true)]
async fn test_lock_after_unlock_does_not_wait() {
    let (_store, _clock, a, b) = two_processes(Duration::from_secs(60));
    let guard = a.lock().await.unwrap();
    guard.release(&a).await.unwrap();

    let before = Instant::now();
    let _guard = b.lock_with_timeout(Duration::from_secs(10)).await.unwrap();
    assert_eq!(Instant::now(), before);
}

#[tokio::test(start_paused = true)]
async fn test_expired_record_is_reclaimed_without_unlock() {
    let (_store, clock, a, b) = two_processes(Duration::from_secs(5));

    // t=0: A acquires and never unlocks
    let _abandoned = a.lock().await.unwrap();

    // t=1: B cannot take it
    clock.advance(Duration::from_secs(1));
    assert_eq!(b.try_lock().await.unwrap(), TryLockOutcome::AlreadyHeld);

    // t=6: B's lock reclaims the stale record
    clock.advance(Duration::from_secs(5));
    let guard_b = b.lock_with_timeout(Duration::from_secs(1)).await.unwrap();
    assert_eq!(guard_b.created_at(), t0() + chrono::Duration::seconds(6));
}

#[tokio::test(start_paused = true)]
async fn test_explicit_prune_then_lock() {
    let (_store, clock, a, b) = two_processes(Duration::from_secs(5));
    let _abandoned = a.try_lock().await.unwrap();

    clock.advance(Duration::from_secs(10));
    assert!(b.prune_expired().await.unwrap());
    assert!(b.try_lock().await.unwrap().is_acquired());
}

#[tokio::test(start_paused = true)]
async fn test_lock_times_out_on_held_key() {
    init_tracing();
    let (store, _clock, a, b) = two_processes(Duration::from_secs(60));
    let _held = a.lock().await.unwrap();

    let started = Instant::now();
    let err = b.lock_with_timeout(Duration::from_secs(2)).await.unwrap_err();

    match err {
        MutexError::Timeout { ref key, waited } => {
            assert_eq!(key, "job-42");
            assert!(waited >= Duration::from_secs(2));
            assert!(waited < Duration::from_secs(3));
        }
        ref other => panic!("expected timeout, got {:?}", other),
    }
    assert!(err.is_timeout());
    assert!(!err.is_transport());
    assert!(started.elapsed() < Duration::from_secs(3));

    // Backoff keeps the attempt count far below a spin loop
    let attempts = store.calls(StoreOp::PutIfAbsent) - 1;
    assert!(attempts >= 2, "only {} attempts", attempts);
    assert!(attempts <= 12, "{} attempts in 2s", attempts);
}

#[tokio::test(start_paused = true)]
async fn test_lock_fails_fast_on_transport_error() {
    let (store, _clock, a, _b) = two_processes(Duration::from_secs(5));
    store.fail_next(StoreOp::PutIfAbsent, 1).await;

    let err = a.lock_with_timeout(Duration::from_secs(30)).await.unwrap_err();
    match err {
        MutexError::Transport { operation, attempts, .. } => {
            assert_eq!(operation, "put_if_absent");
            assert_eq!(attempts, 1);
        }
        other => panic!("expected transport error, got {:?}", other),
    }
    assert_eq!(store.calls(StoreOp::PutIfAbsent), 1);
}

#[tokio::test(start_paused = true)]
async fn test_try_lock_reports_transport_error() {
    let (store, _clock, a, _b) = two_processes(Duration::from_secs(5));
    store.fail_next(StoreOp::PutIfAbsent, 1).await;

    assert!(a.try_lock().await.unwrap_err().is_transport());
    assert!(a.try_lock().await.unwrap().is_acquired());
}

#[tokio::test(start_paused = true)]
async fn test_unlock_retries_are_bounded() {
    let (store, _clock, a, _b) = two_processes(Duration::from_secs(30));
    let guard = a.lock().await.unwrap();
    store.fail_next(StoreOp::DeleteIf, 5).await;

    match a.unlock(&guard).await {
        Err(MutexError::Transport { operation, attempts, .. }) => {
            assert_eq!(operation, "delete_if");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected transport error, got {:?}", other),
    }
    assert_eq!(store.calls(StoreOp::DeleteIf), 3);
    assert!(a.exists().await.unwrap());

    // Two injected faults remain; the third try goes through
    a.unlock(&guard).await.unwrap();
    assert_eq!(store.calls(StoreOp::DeleteIf), 6);
    assert!(!a.exists().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_unlock_is_idempotent() {
    let (_store, _clock, a, b) = two_processes(Duration::from_secs(30));
    let guard = a.lock().await.unwrap();

    a.unlock(&guard).await.unwrap();
    a.unlock(&guard).await.unwrap();
    b.force_unlock().await.unwrap();
    b.force_unlock().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stale_guard_cannot_release_new_holder() {
    let (_store, clock, a, b) = two_processes(Duration::from_secs(5));
    let stale = a.lock().await.unwrap();

    clock.advance(Duration::from_secs(6));
    let current = b.lock_with_timeout(Duration::from_secs(1)).await.unwrap();

    assert!(matches!(a.unlock(&stale).await, Err(MutexError::NotOwner { .. })));

    let record = b.current_record().await.unwrap().unwrap();
    assert_eq!(record.owner.as_ref(), Some(current.fencing_token()));
    b.unlock(&current).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_force_unlock_releases_any_holder() {
    let (_store, _clock, a, b) = two_processes(Duration::from_secs(60));
    let _held = a.lock().await.unwrap();

    b.force_unlock().await.unwrap();
    assert!(b.try_lock().await.unwrap().is_acquired());
}

#[tokio::test(start_paused = true)]
async fn test_keys_are_independent() {
    let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
    let one = DistributedMutex::new(store.clone(), "job-1", Duration::from_secs(30)).unwrap();
    let two = DistributedMutex::new(store, "job-2", Duration::from_secs(30)).unwrap();

    let _g1 = one.lock().await.unwrap();
    let _g2 = two.try_lock().await.unwrap().into_guard().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_custom_schema_layout() {
    let store = InMemoryLockStore::new();
    let options = MutexOptions {
        schema: TableSchema {
            table: "job_locks".to_string(),
            id_field: "name".to_string(),
            ttl_field: None,
            ..TableSchema::default()
        },
        ..MutexOptions::with_ttl(Duration::from_secs(5))
    };
    let mutex = DistributedMutex::with_options(Arc::new(store.clone()), "job-42", options).unwrap();
    mutex.ensure_table().await.unwrap();
    let guard = mutex.lock().await.unwrap();

    let item = store
        .get("job_locks", &ItemKey::new("name", "job-42"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.get_s("owner"), Some(guard.fencing_token().as_str()));
    assert!(item.get("ttl").is_none());
    assert!(store.get("ddbsync_locks", &ItemKey::new("id", "job-42")).await.unwrap().is_none());
}

/// Store that lets another writer replace the record between a reader's
/// lookup and its conditional delete.
struct InterleavingStore {
    inner: InMemoryLockStore,
    schema: TableSchema,
    replaced: AtomicBool,
    replacement_owner: FencingToken,
}

#[async_trait]
impl LockStore for InterleavingStore {
    async fn put_if_absent(&self, table: &str, key: &ItemKey, item: Item) -> StoreResult<PutOutcome> {
        self.inner.put_if_absent(table, key, item).await
    }

    async fn get(&self, table: &str, key: &ItemKey) -> StoreResult<Option<Item>> {
        let seen = self.inner.get(table, key).await?;
        if seen.is_some() && !self.replaced.swap(true, Ordering::SeqCst) {
            // Another process reclaims the record and acquires afresh
            self.inner.delete(table, key).await?;
            let fresh = LockRecord::new(
                LockKey::new(key.value.clone()).unwrap(),
                t0() + chrono::Duration::seconds(20),
                Duration::from_secs(60),
                Some(self.replacement_owner.clone()),
            )
            .unwrap();
            self.inner
                .put_if_absent(table, key, fresh.to_item(&self.schema).unwrap())
                .await?;
        }
        Ok(seen)
    }

    async fn delete(&self, table: &str, key: &ItemKey) -> StoreResult<()> {
        self.inner.delete(table, key).await
    }

    async fn delete_if(&self, table: &str, key: &ItemKey, condition: &DeleteCondition) -> StoreResult<DeleteOutcome> {
        self.inner.delete_if(table, key, condition).await
    }

    fn backend_name(&self) -> &'static str {
        "interleaving"
    }
}

#[tokio::test(start_paused = true)]
async fn test_prune_never_removes_a_fresh_record() {
    let store = Arc::new(InterleavingStore {
        inner: InMemoryLockStore::new(),
        schema: TableSchema::default(),
        replaced: AtomicBool::new(true),
        replacement_owner: FencingToken::generate(),
    });
    let clock = ManualClock::new(t0());
    let mutex = DistributedMutex::new(store.clone(), "job-42", Duration::from_secs(5))
        .unwrap()
        .with_clock(Arc::new(clock.clone()));

    let _abandoned = mutex.try_lock().await.unwrap();
    clock.advance(Duration::from_secs(10));

    // The next lookup sees the expired record while a fresh one replaces it
    store.replaced.store(false, Ordering::SeqCst);
    assert!(!mutex.prune_expired().await.unwrap());

    let record = mutex.current_record().await.unwrap().unwrap();
    assert_eq!(record.owner.as_ref(), Some(&store.replacement_owner));
    assert!(mutex.exists().await.unwrap());
}
