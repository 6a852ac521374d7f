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

//! DynamoDB-based lock store implementation.
//!
//! ## Purpose
//! Production backend for distributed locks. DynamoDB conditional writes are
//! strongly consistent per item, which is exactly the arbitration primitive a
//! distributed mutex needs.
//!
//! ## Operation Mapping
//! - `put_if_absent` → `PutItem` with `attribute_not_exists(#k)`
//! - `get` → `GetItem` (`ConsistentRead=true` unless disabled)
//! - `delete` → `DeleteItem` (no condition, absent key succeeds)
//! - `delete_if` → `DeleteItem` with `#f = :v` and
//!   `ReturnValuesOnConditionCheckFailure=ALL_OLD`; the returned old item (or
//!   its absence) tells `ConditionFailed` from `NotFound`
//!
//! `ConditionalCheckFailedException` is matched on the typed service error.
//! Every other SDK error becomes [`StoreError::Transport`].
//!
//! ## Table Schema
//! ```text
//! Partition Key: <key_field> (String)
//! Attributes: whatever the caller's Item carries (S / N)
//! TTL: optional native TTL attribute (epoch seconds)
//! ```

use crate::aws_config::DynamoDBConfig;
use crate::{
    record_op, AttrValue, DeleteCondition, DeleteOutcome, Item, ItemKey, LockStore, PutOutcome, StoreError,
    StoreResult, TableSpec,
};
use async_trait::async_trait;
use aws_sdk_dynamodb::{
    error::DisplayErrorContext,
    operation::delete_item::DeleteItemError,
    types::{
        AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType, ReturnValuesOnConditionCheckFailure,
        ScalarAttributeType, TableStatus, TimeToLiveSpecification,
    },
    Client as DynamoDbClient,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

const BACKEND: &str = "dynamodb";

/// DynamoDB lock store.
///
/// ## Example
/// ```rust,no_run
/// use ddbsync_store::{aws_config::DynamoDBConfig, ddb::DynamoDbLockStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = DynamoDBConfig::default().with_endpoint("http://localhost:8000");
/// let store = DynamoDbLockStore::new(&config).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DynamoDbLockStore {
    client: DynamoDbClient,
    consistent_reads: bool,
}

impl DynamoDbLockStore {
    /// Create a DynamoDB lock store, loading credentials through the AWS SDK
    /// default provider chain.
    #[instrument(skip(config), fields(region = %config.region))]
    pub async fn new(config: &DynamoDBConfig) -> StoreResult<Self> {
        let mut config_builder = ::aws_config::defaults(::aws_config::BehaviorVersion::latest())
            .region(::aws_config::Region::new(config.region.clone()));

        if let Some(endpoint) = &config.endpoint_url {
            config_builder = config_builder.endpoint_url(endpoint.clone());
        }

        let sdk_config = config_builder.load().await;
        debug!(
            region = %config.region,
            endpoint = ?config.endpoint_url,
            "DynamoDB lock store initialized"
        );

        Ok(Self {
            client: DynamoDbClient::new(&sdk_config),
            consistent_reads: config.consistent_reads,
        })
    }

    /// Wrap an existing client.
    pub fn from_client(client: DynamoDbClient, consistent_reads: bool) -> Self {
        Self {
            client,
            consistent_reads,
        }
    }

    fn to_attribute_map(item: Item) -> HashMap<String, AttributeValue> {
        item.iter()
            .map(|(field, value)| (field.clone(), Self::to_attribute(value)))
            .collect()
    }

    fn to_attribute(value: &AttrValue) -> AttributeValue {
        match value {
            AttrValue::S(s) => AttributeValue::S(s.clone()),
            AttrValue::N(n) => AttributeValue::N(n.to_string()),
        }
    }

    fn from_attribute_map(map: &HashMap<String, AttributeValue>) -> StoreResult<Item> {
        let mut item = Item::new();
        for (field, value) in map {
            match value {
                AttributeValue::S(s) => item.insert(field.clone(), s.clone()),
                AttributeValue::N(n) => {
                    let parsed = n.parse::<i64>().map_err(|e| {
                        StoreError::Deserialization(format!("attribute {} is not an integer ({}): {}", field, n, e))
                    })?;
                    item.insert(field.clone(), parsed);
                }
                // Attributes of other types are not part of the lock model
                _ => {}
            }
        }
        Ok(item)
    }

    /// Wait for table to become active.
    async fn wait_for_table_active(&self, table_name: &str) -> StoreResult<()> {
        let max_attempts = 30;

        for _ in 0..max_attempts {
            let describe = self
                .client
                .describe_table()
                .table_name(table_name)
                .send()
                .await
                .map_err(|e| StoreError::Transport(format!("describe_table failed: {}", DisplayErrorContext(&e))))?;

            match describe.table().and_then(|t| t.table_status()) {
                Some(TableStatus::Active) => {
                    debug!(table_name = %table_name, "Table is now active");
                    return Ok(());
                }
                Some(TableStatus::Creating) | Some(TableStatus::Updating) => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Some(status) => {
                    return Err(StoreError::Transport(format!(
                        "Table {} in unexpected status: {:?}",
                        table_name, status
                    )));
                }
                None => {
                    return Err(StoreError::Transport("Table status not available".to_string()));
                }
            }
        }

        Err(StoreError::Transport(format!(
            "Table {} not active after {} attempts",
            table_name, max_attempts
        )))
    }

    /// Enable native TTL. Failures are logged and ignored: pruning still
    /// reclaims expired locks without it.
    async fn enable_ttl(&self, table_name: &str, attribute: &str) {
        let spec = match TimeToLiveSpecification::builder()
            .enabled(true)
            .attribute_name(attribute)
            .build()
        {
            Ok(spec) => spec,
            Err(e) => {
                warn!(error = %e, table_name = %table_name, "Failed to build TTL spec");
                return;
            }
        };

        match self
            .client
            .update_time_to_live()
            .table_name(table_name)
            .time_to_live_specification(spec)
            .send()
            .await
        {
            Ok(_) => debug!(table_name = %table_name, attribute = %attribute, "TTL enabled"),
            Err(e) => {
                let message = DisplayErrorContext(&e).to_string();
                if message.contains("TimeToLive is already enabled") {
                    debug!(table_name = %table_name, "TTL already enabled");
                } else {
                    warn!(
                        error = %message,
                        table_name = %table_name,
                        "Failed to enable TTL (non-critical, continuing)"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl LockStore for DynamoDbLockStore {
    #[instrument(skip(self, item), fields(table = %table, key = %key))]
    async fn put_if_absent(&self, table: &str, key: &ItemKey, item: Item) -> StoreResult<PutOutcome> {
        let started = std::time::Instant::now();

        let result = self
            .client
            .put_item()
            .table_name(table)
            .set_item(Some(Self::to_attribute_map(item)))
            .condition_expression("attribute_not_exists(#k)")
            .expression_attribute_names("#k", &key.field)
            .send()
            .await;

        match result {
            Ok(_) => {
                record_op(BACKEND, "put_if_absent", "inserted", started);
                Ok(PutOutcome::Inserted)
            }
            Err(e) => {
                let contention = e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false);
                if contention {
                    record_op(BACKEND, "put_if_absent", "exists", started);
                    Ok(PutOutcome::AlreadyExists)
                } else {
                    error!(error = %DisplayErrorContext(&e), "DynamoDB put_item failed");
                    record_op(BACKEND, "put_if_absent", "error", started);
                    Err(StoreError::Transport(format!(
                        "DynamoDB put_item failed: {}",
                        DisplayErrorContext(&e)
                    )))
                }
            }
        }
    }

    #[instrument(skip(self), fields(table = %table, key = %key))]
    async fn get(&self, table: &str, key: &ItemKey) -> StoreResult<Option<Item>> {
        let started = std::time::Instant::now();

        let output = self
            .client
            .get_item()
            .table_name(table)
            .key(&key.field, AttributeValue::S(key.value.clone()))
            .consistent_read(self.consistent_reads)
            .send()
            .await
            .map_err(|e| {
                error!(error = %DisplayErrorContext(&e), "DynamoDB get_item failed");
                record_op(BACKEND, "get", "error", started);
                StoreError::Transport(format!("DynamoDB get_item failed: {}", DisplayErrorContext(&e)))
            })?;

        match output.item() {
            Some(map) => {
                record_op(BACKEND, "get", "found", started);
                Self::from_attribute_map(map).map(Some)
            }
            None => {
                record_op(BACKEND, "get", "not_found", started);
                Ok(None)
            }
        }
    }

    #[instrument(skip(self), fields(table = %table, key = %key))]
    async fn delete(&self, table: &str, key: &ItemKey) -> StoreResult<()> {
        let started = std::time::Instant::now();

        self.client
            .delete_item()
            .table_name(table)
            .key(&key.field, AttributeValue::S(key.value.clone()))
            .send()
            .await
            .map_err(|e| {
                error!(error = %DisplayErrorContext(&e), "DynamoDB delete_item failed");
                record_op(BACKEND, "delete", "error", started);
                StoreError::Transport(format!("DynamoDB delete_item failed: {}", DisplayErrorContext(&e)))
            })?;

        record_op(BACKEND, "delete", "ok", started);
        Ok(())
    }

    #[instrument(skip(self, condition), fields(table = %table, key = %key))]
    async fn delete_if(
        &self,
        table: &str,
        key: &ItemKey,
        condition: &DeleteCondition,
    ) -> StoreResult<DeleteOutcome> {
        let started = std::time::Instant::now();
        let DeleteCondition::FieldEquals { field, value } = condition;

        let result = self
            .client
            .delete_item()
            .table_name(table)
            .key(&key.field, AttributeValue::S(key.value.clone()))
            .condition_expression("#f = :v")
            .expression_attribute_names("#f", field)
            .expression_attribute_values(":v", Self::to_attribute(value))
            .return_values_on_condition_check_failure(ReturnValuesOnConditionCheckFailure::AllOld)
            .send()
            .await;

        match result {
            Ok(_) => {
                record_op(BACKEND, "delete_if", "deleted", started);
                Ok(DeleteOutcome::Deleted)
            }
            Err(e) => match e.as_service_error() {
                Some(DeleteItemError::ConditionalCheckFailedException(failed)) => {
                    // ALL_OLD returns the current item only when one exists
                    if failed.item().is_some() {
                        record_op(BACKEND, "delete_if", "condition_failed", started);
                        Ok(DeleteOutcome::ConditionFailed)
                    } else {
                        record_op(BACKEND, "delete_if", "not_found", started);
                        Ok(DeleteOutcome::NotFound)
                    }
                }
                _ => {
                    error!(error = %DisplayErrorContext(&e), "DynamoDB conditional delete_item failed");
                    record_op(BACKEND, "delete_if", "error", started);
                    Err(StoreError::Transport(format!(
                        "DynamoDB delete_item failed: {}",
                        DisplayErrorContext(&e)
                    )))
                }
            },
        }
    }

    /// Create a PAY_PER_REQUEST table hashed on `spec.key_field` if missing,
    /// wait for it to become active and enable native TTL when requested.
    #[instrument(skip(self), fields(table = %spec.name))]
    async fn ensure_table(&self, spec: &TableSpec) -> StoreResult<()> {
        match self.client.describe_table().table_name(&spec.name).send().await {
            Ok(_) => {
                debug!(table_name = %spec.name, "DynamoDB table already exists");
                if let Some(attribute) = &spec.ttl_attribute {
                    self.enable_ttl(&spec.name, attribute).await;
                }
                return Ok(());
            }
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|se| se.is_resource_not_found_exception())
                    .unwrap_or(false);
                if !not_found {
                    error!(error = %DisplayErrorContext(&e), "DynamoDB describe_table failed with unexpected error");
                    return Err(StoreError::Transport(format!(
                        "Failed to check table existence: {}",
                        DisplayErrorContext(&e)
                    )));
                }
            }
        }

        debug!(table_name = %spec.name, "Creating DynamoDB table");

        let key_schema = KeySchemaElement::builder()
            .attribute_name(&spec.key_field)
            .key_type(KeyType::Hash)
            .build()
            .map_err(|e| StoreError::Config(format!("Failed to build key schema: {}", e)))?;

        let key_attr = AttributeDefinition::builder()
            .attribute_name(&spec.key_field)
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(|e| StoreError::Config(format!("Failed to build attribute definition: {}", e)))?;

        let created = self
            .client
            .create_table()
            .table_name(&spec.name)
            .billing_mode(BillingMode::PayPerRequest)
            .key_schema(key_schema)
            .attribute_definitions(key_attr)
            .send()
            .await;

        if let Err(e) = created {
            let in_use = e
                .as_service_error()
                .map(|se| se.is_resource_in_use_exception())
                .unwrap_or(false);
            if !in_use {
                return Err(StoreError::Transport(format!(
                    "Failed to create DynamoDB table: {}",
                    DisplayErrorContext(&e)
                )));
            }
            debug!(table_name = %spec.name, "Table created concurrently, waiting for active");
        }

        self.wait_for_table_active(&spec.name).await?;

        if let Some(attribute) = &spec.ttl_attribute {
            self.enable_ttl(&spec.name, attribute).await;
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
