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

//! Lock keys, fencing tokens and the persisted lock record.

use crate::schema::TableSchema;
use crate::{MutexError, MutexResult};
use chrono::{DateTime, Utc};
use ddbsync_store::{AttrValue, Item};
use std::fmt;
use std::time::Duration;
use ulid::Ulid;

/// Maximum lock key length in bytes (DynamoDB partition key limit).
pub const MAX_KEY_LEN: usize = 2048;

/// Name of the resource being locked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// Validate and wrap a lock key.
    pub fn new(key: impl Into<String>) -> MutexResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(MutexError::InvalidKey("lock key must not be empty".to_string()));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(MutexError::InvalidKey(format!(
                "lock key is {} bytes, limit is {}",
                key.len(),
                MAX_KEY_LEN
            )));
        }
        Ok(Self(key))
    }

    /// Key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-acquisition owner identity, written with the record and checked on release.
///
/// ULIDs sort by creation time, which keeps tokens readable in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FencingToken(String);

impl FencingToken {
    /// Fresh, unique token.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Token from a stored value.
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The item persisted while a lock is held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    /// Lock key
    pub key: LockKey,
    /// When the lock was acquired
    pub created_at: DateTime<Utc>,
    /// `created_at + ttl`; past this instant the record is stale
    pub expires_at: DateTime<Utc>,
    /// Holder's fencing token (absent on records written by older clients)
    pub owner: Option<FencingToken>,
}

impl LockRecord {
    /// Record acquired at `now` for `ttl`.
    pub fn new(key: LockKey, now: DateTime<Utc>, ttl: Duration, owner: Option<FencingToken>) -> MutexResult<Self> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| MutexError::Serialization(format!("ttl {:?} out of range: {}", ttl, e)))?;
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| MutexError::Serialization(format!("expiry overflows for key {}", key)))?;

        Ok(Self {
            key,
            created_at: now,
            expires_at,
            owner,
        })
    }

    /// Whether `now` is strictly past the expiry instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Encode into a store item.
    pub fn to_item(&self, schema: &TableSchema) -> MutexResult<Item> {
        let mut item = Item::new()
            .with(&schema.id_field, self.key.as_str())
            .with(&schema.created_field, self.created_at.timestamp_millis())
            .with(&schema.expires_field, self.expires_at.timestamp_millis());
        if let Some(owner) = &self.owner {
            item.insert(&schema.owner_field, owner.as_str());
        }
        if let Some(ttl_field) = &schema.ttl_field {
            // DynamoDB TTL wants epoch seconds; round up so the item never vanishes early
            let secs = (self.expires_at.timestamp_millis() + 999).div_euclid(1000);
            item.insert(ttl_field, secs);
        }
        Ok(item)
    }

    /// Decode from a store item.
    pub fn from_item(item: &Item, schema: &TableSchema) -> MutexResult<Self> {
        let id = item
            .get_s(&schema.id_field)
            .ok_or_else(|| missing(&schema.id_field, "S"))?;
        let key = LockKey::new(id).map_err(|e| MutexError::Deserialization(e.to_string()))?;

        let created_at = millis_field(item, &schema.created_field)?;
        let expires_at = millis_field(item, &schema.expires_field)?;

        let owner = match item.get(&schema.owner_field) {
            None => None,
            Some(AttrValue::S(token)) => Some(FencingToken::from_string(token.clone())),
            Some(other) => {
                return Err(MutexError::Deserialization(format!(
                    "field '{}' must be a string, got {}",
                    schema.owner_field, other
                )))
            }
        };

        Ok(Self {
            key,
            created_at,
            expires_at,
            owner,
        })
    }
}

fn missing(field: &str, kind: &str) -> MutexError {
    MutexError::Deserialization(format!("missing or mistyped field '{}' (expected {})", field, kind))
}

fn millis_field(item: &Item, field: &str) -> MutexResult<DateTime<Utc>> {
    let ms = item.get_n(field).ok_or_else(|| missing(field, "N"))?;
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| MutexError::Deserialization(format!("field '{}' timestamp {} out of range", field, ms)))
}
