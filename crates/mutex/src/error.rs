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

//! Error types for distributed mutex operations.

use ddbsync_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type for mutex operations.
pub type MutexResult<T> = Result<T, MutexError>;

/// Errors that can occur during mutex operations.
///
/// Contention is not an error: [`try_lock`](crate::DistributedMutex::try_lock)
/// reports it as [`TryLockOutcome::AlreadyHeld`](crate::TryLockOutcome::AlreadyHeld)
/// and [`lock`](crate::DistributedMutex::lock) absorbs it until its deadline,
/// then reports [`MutexError::Timeout`].
#[derive(Error, Debug)]
pub enum MutexError {
    /// Invalid lock key
    #[error("Invalid lock key: {0}")]
    InvalidKey(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lock record could not be encoded (never retried)
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored lock record could not be decoded
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Backend unreachable or failing, after bounded retries
    #[error("Transport error during {operation} after {attempts} attempt(s): {source}")]
    Transport {
        /// Store operation that failed
        operation: &'static str,
        /// Attempts made, including the failing one
        attempts: u32,
        /// Last store error
        #[source]
        source: StoreError,
    },

    /// Lock deadline elapsed while the key stayed held
    #[error("Timed out after {waited:?} waiting for lock: {key}")]
    Timeout {
        /// Lock key
        key: String,
        /// Time spent waiting
        waited: Duration,
    },

    /// Release attempted with a fencing token that no longer owns the lock
    #[error("Lock {key} is held by another owner")]
    NotOwner {
        /// Lock key
        key: String,
    },

    /// Other store error (invalid table, store configuration)
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl MutexError {
    /// Whether this error means "resource busy" rather than a fault.
    pub fn is_timeout(&self) -> bool {
        matches!(self, MutexError::Timeout { .. })
    }

    /// Whether this error means "backend unreachable".
    pub fn is_transport(&self) -> bool {
        matches!(self, MutexError::Transport { .. })
    }

    /// Classify a store error raised by `operation` after `attempts` tries.
    pub(crate) fn from_store(operation: &'static str, attempts: u32, err: StoreError) -> Self {
        match err {
            StoreError::Transport(_) => MutexError::Transport {
                operation,
                attempts,
                source: err,
            },
            StoreError::Serialization(msg) => MutexError::Serialization(msg),
            StoreError::Deserialization(msg) => MutexError::Deserialization(msg),
            other => MutexError::Store(other),
        }
    }
}
