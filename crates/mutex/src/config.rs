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

//! Mutex configuration.
//!
//! ## Environment Variables
//! - `DDBSYNC_LOCK_TABLE` - lock table name (default: "ddbsync_locks")
//! - `DDBSYNC_FIELD_ID` / `DDBSYNC_FIELD_CREATED` / `DDBSYNC_FIELD_EXPIRES` /
//!   `DDBSYNC_FIELD_OWNER` - attribute names (defaults: id, created, expires, owner)
//! - `DDBSYNC_FIELD_TTL` - native TTL attribute (default: "ttl", empty disables)
//! - `DDBSYNC_LOCK_TTL_MS` - lock lifetime (default: 30000)
//! - `DDBSYNC_LOCK_TIMEOUT_MS` - default `lock()` deadline (default: 30000)
//! - `DDBSYNC_BACKOFF_INITIAL_MS` / `DDBSYNC_BACKOFF_MAX_MS` - contention
//!   backoff bounds (defaults: 50 / 2000)
//! - `DDBSYNC_RETRY_MAX_ATTEMPTS` - transport retry budget (default: 3)

use crate::backoff::{BackoffPolicy, RetryPolicy};
use crate::schema::TableSchema;
use crate::{MutexError, MutexResult};
use std::env;
use std::time::Duration;

/// Default lock lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Default deadline for [`DistributedMutex::lock`](crate::DistributedMutex::lock).
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a [`DistributedMutex`](crate::DistributedMutex) is configured with.
#[derive(Debug, Clone, PartialEq)]
pub struct MutexOptions {
    /// Lock lifetime written into each record
    pub ttl: Duration,
    /// Deadline used by `lock()`
    pub lock_timeout: Duration,
    /// Delay between contended acquisition attempts
    pub backoff: BackoffPolicy,
    /// Transport retries for release, prune and lookup
    pub retry: RetryPolicy,
    /// Record layout
    pub schema: TableSchema,
}

impl Default for MutexOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            backoff: BackoffPolicy::default(),
            retry: RetryPolicy::default(),
            schema: TableSchema::default(),
        }
    }
}

impl MutexOptions {
    /// Defaults with the given lock lifetime.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Self::default()
        }
    }

    /// Load options from environment variables.
    pub fn from_env() -> MutexResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load options from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> MutexResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let schema_defaults = defaults.schema.clone();

        let field = |name: &str, default: String| lookup(name).filter(|s| !s.is_empty()).unwrap_or(default);

        let ttl_field = match lookup("DDBSYNC_FIELD_TTL") {
            Some(v) if v.is_empty() => None,
            Some(v) => Some(v),
            None => schema_defaults.ttl_field.clone(),
        };

        let schema = TableSchema {
            table: field("DDBSYNC_LOCK_TABLE", schema_defaults.table),
            id_field: field("DDBSYNC_FIELD_ID", schema_defaults.id_field),
            created_field: field("DDBSYNC_FIELD_CREATED", schema_defaults.created_field),
            expires_field: field("DDBSYNC_FIELD_EXPIRES", schema_defaults.expires_field),
            owner_field: field("DDBSYNC_FIELD_OWNER", schema_defaults.owner_field),
            ttl_field,
        };

        let millis = |name: &str, default: Duration| -> MutexResult<Duration> {
            match lookup(name) {
                None => Ok(default),
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|e| MutexError::Config(format!("{}='{}' is not a millisecond count: {}", name, v, e))),
            }
        };

        let backoff = BackoffPolicy {
            initial_delay: millis("DDBSYNC_BACKOFF_INITIAL_MS", defaults.backoff.initial_delay)?,
            max_delay: millis("DDBSYNC_BACKOFF_MAX_MS", defaults.backoff.max_delay)?,
            multiplier: defaults.backoff.multiplier,
        };

        let max_attempts = match lookup("DDBSYNC_RETRY_MAX_ATTEMPTS") {
            None => defaults.retry.max_attempts,
            Some(v) => v.trim().parse::<u32>().map_err(|e| {
                MutexError::Config(format!("DDBSYNC_RETRY_MAX_ATTEMPTS='{}' is not a count: {}", v, e))
            })?,
        };

        let options = Self {
            ttl: millis("DDBSYNC_LOCK_TTL_MS", defaults.ttl)?,
            lock_timeout: millis("DDBSYNC_LOCK_TIMEOUT_MS", defaults.lock_timeout)?,
            backoff,
            retry: RetryPolicy {
                max_attempts,
                backoff: defaults.retry.backoff,
            },
            schema,
        };
        options.validate()?;
        Ok(options)
    }

    /// Reject options no mutex can run with.
    pub fn validate(&self) -> MutexResult<()> {
        if self.ttl.is_zero() {
            return Err(MutexError::Config("lock ttl must be > 0".to_string()));
        }
        self.backoff.validate()?;
        self.retry.validate()?;
        self.schema.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let options = MutexOptions::from_lookup(lookup(&[])).unwrap();
        assert_eq!(options, MutexOptions::default());
        assert_eq!(options.ttl, Duration::from_secs(30));
        assert_eq!(options.retry.max_attempts, 3);
        assert_eq!(options.schema.table, "ddbsync_locks");
    }

    #[test]
    fn test_overrides() {
        let options = MutexOptions::from_lookup(lookup(&[
            ("DDBSYNC_LOCK_TABLE", "job_locks"),
            ("DDBSYNC_FIELD_ID", "name"),
            ("DDBSYNC_FIELD_TTL", ""),
            ("DDBSYNC_LOCK_TTL_MS", "5000"),
            ("DDBSYNC_LOCK_TIMEOUT_MS", "2000"),
            ("DDBSYNC_BACKOFF_INITIAL_MS", "10"),
            ("DDBSYNC_BACKOFF_MAX_MS", "100"),
            ("DDBSYNC_RETRY_MAX_ATTEMPTS", "5"),
        ]))
        .unwrap();

        assert_eq!(options.schema.table, "job_locks");
        assert_eq!(options.schema.id_field, "name");
        assert_eq!(options.schema.ttl_field, None);
        assert_eq!(options.ttl, Duration::from_secs(5));
        assert_eq!(options.lock_timeout, Duration::from_secs(2));
        assert_eq!(options.backoff.initial_delay, Duration::from_millis(10));
        assert_eq!(options.backoff.max_delay, Duration::from_millis(100));
        assert_eq!(options.retry.max_attempts, 5);
    }

    #[test]
    fn test_invalid_values() {
        let bad_number = MutexOptions::from_lookup(lookup(&[("DDBSYNC_LOCK_TTL_MS", "soon")]));
        assert!(matches!(bad_number, Err(MutexError::Config(_))));

        let zero_ttl = MutexOptions::from_lookup(lookup(&[("DDBSYNC_LOCK_TTL_MS", "0")]));
        assert!(matches!(zero_ttl, Err(MutexError::Config(_))));

        let zero_attempts = MutexOptions::from_lookup(lookup(&[("DDBSYNC_RETRY_MAX_ATTEMPTS", "0")]));
        assert!(matches!(zero_attempts, Err(MutexError::Config(_))));
    }
}
