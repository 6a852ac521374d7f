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

//! AWS configuration helpers.
//!
//! ## Environment Variables
//! - `AWS_REGION` / `DDBSYNC_AWS_REGION` - AWS region (default: "us-east-1")
//! - `DYNAMODB_ENDPOINT_URL` / `DDBSYNC_DDB_ENDPOINT_URL` - DynamoDB endpoint
//!   URL (for DynamoDB Local)
//! - `DDBSYNC_DDB_CONSISTENT_READS` - use strongly consistent reads (default: true)
//!
//! Credentials are resolved by the AWS SDK default provider chain
//! (`AWS_ACCESS_KEY_ID`, profiles, instance roles, ...).

use std::env;

/// DynamoDB configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamoDBConfig {
    /// AWS region
    pub region: String,
    /// Endpoint URL (for local testing)
    pub endpoint_url: Option<String>,
    /// Issue `get_item` with `ConsistentRead=true`
    pub consistent_reads: bool,
}

impl Default for DynamoDBConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint_url: None,
            consistent_reads: true,
        }
    }
}

impl DynamoDBConfig {
    /// Load DynamoDB configuration from environment variables.
    pub fn from_env() -> Self {
        let region = env::var("AWS_REGION")
            .or_else(|_| env::var("DDBSYNC_AWS_REGION"))
            .unwrap_or_else(|_| "us-east-1".to_string());

        let endpoint_url = env::var("DYNAMODB_ENDPOINT_URL")
            .or_else(|_| env::var("DDBSYNC_DDB_ENDPOINT_URL"))
            .ok()
            .filter(|s| !s.is_empty());

        let consistent_reads = env::var("DDBSYNC_DDB_CONSISTENT_READS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(true);

        Self {
            region,
            endpoint_url,
            consistent_reads,
        }
    }

    /// Override the endpoint (DynamoDB Local, LocalStack).
    pub fn with_endpoint(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DynamoDBConfig::default();
        assert_eq!(config.region, "us-east-1");
        assert!(config.endpoint_url.is_none());
        assert!(config.consistent_reads);
    }

    #[test]
    fn test_with_endpoint() {
        let config = DynamoDBConfig::default().with_endpoint("http://localhost:8000");
        assert_eq!(config.endpoint_url.as_deref(), Some("http://localhost:8000"));
    }
}
