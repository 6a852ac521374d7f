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

//! Store-level item model shared by every backend.
//!
//! An [`Item`] is a flat map of field name to [`AttrValue`]. Only strings and
//! signed integers are supported: that is everything a lock record needs, and
//! it maps one-to-one onto DynamoDB `S`/`N` attributes and onto JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// String attribute
    S(String),
    /// Integer attribute
    N(i64),
}

impl AttrValue {
    /// String content, if this is an `S` value.
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttrValue::S(s) => Some(s),
            AttrValue::N(_) => None,
        }
    }

    /// Integer content, if this is an `N` value.
    pub fn as_n(&self) -> Option<i64> {
        match self {
            AttrValue::N(n) => Some(*n),
            AttrValue::S(_) => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::S(s) => write!(f, "{}", s),
            AttrValue::N(n) => write!(f, "{}", n),
        }
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::S(s)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::S(s.to_string())
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        AttrValue::N(n)
    }
}

/// A stored record: field name to attribute value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(BTreeMap<String, AttrValue>);

impl Item {
    /// Create an empty item.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.insert(field, value);
        self
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<AttrValue>) {
        self.0.insert(field.into(), value.into());
    }

    /// Raw attribute lookup.
    pub fn get(&self, field: &str) -> Option<&AttrValue> {
        self.0.get(field)
    }

    /// String field lookup.
    pub fn get_s(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(AttrValue::as_s)
    }

    /// Integer field lookup.
    pub fn get_n(&self, field: &str) -> Option<i64> {
        self.0.get(field).and_then(AttrValue::as_n)
    }

    /// Whether `field` is present with exactly `value`.
    pub fn field_equals(&self, field: &str, value: &AttrValue) -> bool {
        self.0.get(field) == Some(value)
    }

    /// Iterate fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.0.iter()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the item has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, AttrValue)> for Item {
    fn from_iter<T: IntoIterator<Item = (String, AttrValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Primary key of an item: the key attribute name and its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    /// Key attribute name
    pub field: String,
    /// Key value
    pub value: String,
}

impl ItemKey {
    /// Create a key.
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.field, self.value)
    }
}

/// Table provisioning parameters for backends that can create tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// Table name
    pub name: String,
    /// Hash key attribute
    pub key_field: String,
    /// Attribute holding an expiry in epoch seconds for native TTL cleanup
    pub ttl_attribute: Option<String>,
}
