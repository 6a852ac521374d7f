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

//! Configuration support for lock store backends.
//!
//! ## Environment Variables
//!
//! ### Backend Selection
//! - `DDBSYNC_STORE_BACKEND`: Backend type (default: "in-memory")
//!   - "in-memory" | "memory" → InMemoryLockStore
//!   - "dynamodb" | "ddb" → DynamoDbLockStore
//!   - "sqlite" → SqliteLockStore
//!
//! ### SQLite Configuration
//! - `DDBSYNC_SQLITE_URL`: sqlx SQLite URL (default: "sqlite::memory:")
//!
//! ### DynamoDB Configuration
//! See [`DynamoDBConfig::from_env`].
//!
//! ## Examples
//!
//! ### DynamoDB Local
//! ```bash
//! export DDBSYNC_STORE_BACKEND=dynamodb
//! export DYNAMODB_ENDPOINT_URL=http://localhost:8000
//! cargo run
//! ```
//!
//! ### SQLite
//! ```bash
//! export DDBSYNC_STORE_BACKEND=sqlite
//! export DDBSYNC_SQLITE_URL=sqlite:///tmp/ddbsync.db?mode=rwc
//! cargo run
//! ```

use crate::aws_config::DynamoDBConfig;
use crate::{InMemoryLockStore, LockStore, StoreError, StoreResult};
use std::sync::Arc;
use tracing::debug;

/// Backend type configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BackendType {
    /// In-memory HashMap backend (default, always available)
    #[default]
    InMemory,
    /// DynamoDB backend (requires ddb-backend feature)
    DynamoDB(DynamoDBConfig),
    /// SQLite backend (requires sqlite-backend feature)
    Sqlite {
        /// sqlx database URL
        url: String,
    },
}

/// Lock store configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreConfig {
    /// Backend type
    pub backend: BackendType,
}

impl StoreConfig {
    /// Create configuration from environment variables.
    ///
    /// ## Examples
    /// ```rust
    /// use ddbsync_store::StoreConfig;
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = StoreConfig::from_env()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_env() -> StoreResult<Self> {
        let backend_str = std::env::var("DDBSYNC_STORE_BACKEND")
            .unwrap_or_else(|_| "in-memory".to_string());
        Self::from_backend_name(&backend_str)
    }

    /// Build configuration for a backend name, reading the backend's own
    /// settings from the environment.
    pub fn from_backend_name(name: &str) -> StoreResult<Self> {
        let backend = match name.trim().to_lowercase().as_str() {
            "in-memory" | "memory" => BackendType::InMemory,
            "dynamodb" | "ddb" => BackendType::DynamoDB(DynamoDBConfig::from_env()),
            "sqlite" => {
                let url = std::env::var("DDBSYNC_SQLITE_URL")
                    .unwrap_or_else(|_| "sqlite::memory:".to_string());
                BackendType::Sqlite { url }
            }
            other => {
                return Err(StoreError::Config(format!(
                    "Unknown backend type '{}'. Valid options: in-memory, dynamodb, sqlite",
                    other
                )));
            }
        };
        Ok(Self { backend })
    }
}

/// Create a lock store from configuration.
///
/// The returned handle is meant to be created once per process and shared by
/// every mutex.
pub async fn create_store_from_config(config: &StoreConfig) -> StoreResult<Arc<dyn LockStore>> {
    match &config.backend {
        BackendType::InMemory => {
            debug!("Using in-memory lock store");
            Ok(Arc::new(InMemoryLockStore::new()))
        }

        #[cfg(feature = "ddb-backend")]
        BackendType::DynamoDB(ddb_config) => {
            debug!(region = %ddb_config.region, "Using DynamoDB lock store");
            let store = crate::ddb::DynamoDbLockStore::new(ddb_config).await?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "ddb-backend"))]
        BackendType::DynamoDB(_) => Err(StoreError::Config(
            "DynamoDB backend requires the 'ddb-backend' feature".to_string(),
        )),

        #[cfg(feature = "sqlite-backend")]
        BackendType::Sqlite { url } => {
            debug!(url = %url, "Using SQLite lock store");
            let store = crate::sql::SqliteLockStore::new(url).await?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "sqlite-backend"))]
        BackendType::Sqlite { .. } => Err(StoreError::Config(
            "SQLite backend requires the 'sqlite-backend' feature".to_string(),
        )),
    }
}

/// Create a lock store from environment variables.
pub async fn create_store_from_env() -> StoreResult<Arc<dyn LockStore>> {
    let config = StoreConfig::from_env()?;
    create_store_from_config(&config).await
}
