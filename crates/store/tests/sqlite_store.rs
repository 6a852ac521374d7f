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

//! SQLite lock store integration tests.
//!
//! Runs against `sqlite::memory:`; every test gets its own database.

#[cfg(feature = "sqlite-backend")]
mod tests {
    use ddbsync_store::{
        create_store_from_config, BackendType, DeleteCondition, DeleteOutcome, Item, ItemKey, LockStore, PutOutcome,
        SqliteLockStore, StoreConfig, StoreError, TableSpec,
    };
    use std::sync::Arc;

    const TABLE: &str = "ddbsync_locks";

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    async fn create_store() -> SqliteLockStore {
        init_tracing();
        SqliteLockStore::new("sqlite::memory:")
            .await
            .expect("Failed to create SQLite lock store")
    }

    fn lock_item(key: &str, owner: &str) -> Item {
        Item::new()
            .with("id", key)
            .with("created", 1_000i64)
            .with("expires", 31_000i64)
            .with("owner", owner)
    }

    #[tokio::test]
    async fn test_sqlite_put_if_absent() {
        let store = create_store().await;
        let key = ItemKey::new("id", "job-42");

        let first = store.put_if_absent(TABLE, &key, lock_item("job-42", "a")).await.unwrap();
        assert_eq!(first, PutOutcome::Inserted);

        let second = store.put_if_absent(TABLE, &key, lock_item("job-42", "b")).await.unwrap();
        assert_eq!(second, PutOutcome::AlreadyExists);

        // The first writer's item is untouched
        let stored = store.get(TABLE, &key).await.unwrap().unwrap();
        assert_eq!(stored.get_s("owner"), Some("a"));
        assert_eq!(stored, lock_item("job-42", "a"));
    }

    #[tokio::test]
    async fn test_sqlite_get_absent() {
        let store = create_store().await;
        let found = store.get(TABLE, &ItemKey::new("id", "missing")).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_sqlite_delete_is_idempotent() {
        let store = create_store().await;
        let key = ItemKey::new("id", "job-42");
        store.put_if_absent(TABLE, &key, lock_item("job-42", "a")).await.unwrap();

        store.delete(TABLE, &key).await.unwrap();
        store.delete(TABLE, &key).await.unwrap();
        assert!(store.get(TABLE, &key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_delete_if_outcomes() {
        let store = create_store().await;
        let key = ItemKey::new("id", "job-42");

        let absent = store
            .delete_if(TABLE, &key, &DeleteCondition::field_equals("owner", "a"))
            .await
            .unwrap();
        assert_eq!(absent, DeleteOutcome::NotFound);

        store.put_if_absent(TABLE, &key, lock_item("job-42", "a")).await.unwrap();

        let mismatch = store
            .delete_if(TABLE, &key, &DeleteCondition::field_equals("owner", "b"))
            .await
            .unwrap();
        assert_eq!(mismatch, DeleteOutcome::ConditionFailed);
        assert!(store.get(TABLE, &key).await.unwrap().is_some());

        let by_created = store
            .delete_if(TABLE, &key, &DeleteCondition::field_equals("created", 1_000i64))
            .await
            .unwrap();
        assert_eq!(by_created, DeleteOutcome::Deleted);
        assert!(store.get(TABLE, &key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_tables_are_isolated() {
        let store = create_store().await;
        let key = ItemKey::new("id", "job-42");

        store.put_if_absent("locks_a", &key, lock_item("job-42", "a")).await.unwrap();
        let other = store.put_if_absent("locks_b", &key, lock_item("job-42", "b")).await.unwrap();
        assert_eq!(other, PutOutcome::Inserted);
    }

    #[tokio::test]
    async fn test_sqlite_rejects_unsafe_table_names() {
        let store = create_store().await;
        let result = store
            .get("locks; DROP TABLE x", &ItemKey::new("id", "job-42"))
            .await;
        assert!(matches!(result, Err(StoreError::InvalidTable(_))));
    }

    #[tokio::test]
    async fn test_sqlite_ensure_table() {
        let store = create_store().await;
        let spec = TableSpec {
            name: "provisioned".to_string(),
            key_field: "id".to_string(),
            ttl_attribute: Some("ttl".to_string()),
        };
        store.ensure_table(&spec).await.unwrap();
        store.ensure_table(&spec).await.unwrap();
        assert_eq!(store.backend_name(), "sqlite");
    }

    #[tokio::test]
    async fn test_sqlite_concurrent_inserts() {
        let store: Arc<dyn LockStore> = Arc::new(create_store().await);
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let key = ItemKey::new("id", "race");
                store
                    .put_if_absent(TABLE, &key, lock_item("race", &format!("owner-{}", i)))
                    .await
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == PutOutcome::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn test_sqlite_factory() {
        let config = StoreConfig {
            backend: BackendType::Sqlite {
                url: "sqlite::memory:".to_string(),
            },
        };
        let store = create_store_from_config(&config).await.unwrap();
        assert_eq!(store.backend_name(), "sqlite");
    }
}
