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

//! Error types for lock store operations.

use thiserror::Error;

/// Result type for lock store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to a lock store.
///
/// Contention is never an error here: a rejected conditional insert is
/// [`PutOutcome::AlreadyExists`](crate::PutOutcome::AlreadyExists) and a
/// rejected conditional delete is
/// [`DeleteOutcome::ConditionFailed`](crate::DeleteOutcome::ConditionFailed).
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend or network fault (retryable by callers, within bounds)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Item could not be encoded for the backend
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored item could not be decoded
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Table name rejected by the backend adapter
    #[error("Invalid table name: {0}")]
    InvalidTable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether this is a transport fault, the only kind worth retrying.
    pub fn is_transport(&self) -> bool {
        matches!(self, StoreError::Transport(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            StoreError::Deserialization(err.to_string())
        } else {
            StoreError::Serialization(err.to_string())
        }
    }
}

#[cfg(feature = "sqlite-backend")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Transport(format!("SQL error: {}", err))
    }
}
