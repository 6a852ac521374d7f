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

//! # ddbsync Mutex
//!
//! Distributed mutual exclusion over a conditional-write key-value store.
//!
//! ## Purpose
//! Lets independent processes, with no shared memory, agree on at most one
//! holder per lock key. All arbitration happens in the store's atomic
//! conditional insert.
//!
//! ## Design
//! - **Lock record**: `{key, created, expires, owner}`, written once and deleted, never updated
//! - **TTL**: a holder that dies without unlocking is reclaimed after `expires`
//! - **Fencing**: release deletes only while the record still carries the holder's token
//! - **Typed outcomes**: contention is `AlreadyHeld` / `Timeout`, backend faults are `Transport`
//! - **Bounded waiting**: jittered backoff up to a deadline; transport retries are capped
//!
//! ## Consistency
//! Mutual exclusion is exactly as strong as the store's conditional write.
//! DynamoDB conditional writes and consistent reads give at most one holder.
//! On an eventually consistent store the guarantee degrades to best effort.
//!
//! Expiry compares the local clock with the stored `expires`. Clock skew between
//! hosts shifts the effective TTL by the skew; budget TTLs accordingly. A holder
//! whose work can outlive its TTL must not assume it still holds the lock.
//!
//! ## Example
//! ```rust,no_run
//! use ddbsync_mutex::{DistributedMutex, TryLockOutcome};
//! use ddbsync_store::InMemoryLockStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> ddbsync_mutex::MutexResult<()> {
//! let store = Arc::new(InMemoryLockStore::new());
//! let mutex = DistributedMutex::new(store, "job-42", Duration::from_secs(30))?;
//!
//! let guard = mutex.lock_with_timeout(Duration::from_secs(2)).await?;
//! // ... critical section ...
//! guard.release(&mutex).await?;
//!
//! match mutex.try_lock().await? {
//!     TryLockOutcome::Acquired(guard) => mutex.unlock(&guard).await?,
//!     TryLockOutcome::AlreadyHeld => {}
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;
pub mod mutex;
pub mod record;
pub mod schema;

pub use backoff::{BackoffPolicy, RetryPolicy, MIN_INITIAL_DELAY};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{MutexOptions, DEFAULT_LOCK_TIMEOUT, DEFAULT_TTL};
pub use error::{MutexError, MutexResult};
pub use mutex::{DistributedMutex, LockGuard, TryLockOutcome};
pub use record::{FencingToken, LockKey, LockRecord, MAX_KEY_LEN};
pub use schema::TableSchema;
