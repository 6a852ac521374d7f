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

//! Table and field names a lock record is stored under.

use crate::record::LockKey;
use crate::{MutexError, MutexResult};
use ddbsync_store::{ItemKey, TableSpec};

/// Where and how lock records are laid out in the store.
///
/// ## Defaults
/// ```text
/// table:         ddbsync_locks
/// id_field:      id        (S, item key)
/// created_field: created   (N, epoch ms)
/// expires_field: expires   (N, epoch ms)
/// owner_field:   owner     (S, fencing token)
/// ttl_field:     ttl       (N, epoch seconds, native TTL; None disables)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table / collection name
    pub table: String,
    /// Key attribute holding the lock key
    pub id_field: String,
    /// CreatedAt attribute
    pub created_field: String,
    /// ExpiresAt attribute
    pub expires_field: String,
    /// Fencing token attribute
    pub owner_field: String,
    /// Native TTL attribute (epoch seconds)
    pub ttl_field: Option<String>,
}

impl Default for TableSchema {
    fn default() -> Self {
        Self {
            table: "ddbsync_locks".to_string(),
            id_field: "id".to_string(),
            created_field: "created".to_string(),
            expires_field: "expires".to_string(),
            owner_field: "owner".to_string(),
            ttl_field: Some("ttl".to_string()),
        }
    }
}

impl TableSchema {
    /// Schema with default field names in `table`.
    pub fn with_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Check that every name is set and no two fields collide.
    pub fn validate(&self) -> MutexResult<()> {
        if self.table.is_empty() {
            return Err(MutexError::Config("table name must not be empty".to_string()));
        }

        let mut fields = vec![
            self.id_field.as_str(),
            self.created_field.as_str(),
            self.expires_field.as_str(),
            self.owner_field.as_str(),
        ];
        if let Some(ttl) = &self.ttl_field {
            fields.push(ttl.as_str());
        }

        if fields.iter().any(|f| f.is_empty()) {
            return Err(MutexError::Config("field names must not be empty".to_string()));
        }
        for (i, field) in fields.iter().enumerate() {
            if fields[i + 1..].contains(field) {
                return Err(MutexError::Config(format!("field name '{}' is used twice", field)));
            }
        }
        Ok(())
    }

    /// Store key for `key`.
    pub fn item_key(&self, key: &LockKey) -> ItemKey {
        ItemKey::new(&self.id_field, key.as_str())
    }

    /// Provisioning parameters for [`LockStore::ensure_table`](ddbsync_store::LockStore::ensure_table).
    pub fn table_spec(&self) -> TableSpec {
        TableSpec {
            name: self.table.clone(),
            key_field: self.id_field.clone(),
            ttl_attribute: self.ttl_field.clone(),
        }
    }
}
