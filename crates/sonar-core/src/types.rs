// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the channel, storage, ingestion and data crates.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but running with reduced guarantees.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter behind a trait object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    LogStore,
    Ingestion,
    DocumentCache,
    DocumentRemote,
    TokenExchange,
}

/// Snapshot of the device a log was produced on.
///
/// Collected once by a [`DeviceInfoProvider`](crate::traits::DeviceInfoProvider)
/// and attached to every log until the cache is invalidated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub sdk_name: String,
    pub sdk_version: String,
    pub model: String,
    pub oem_name: String,
    pub os_name: String,
    pub os_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_api_level: Option<i32>,
    pub locale: String,
    /// Offset from UTC in minutes.
    pub time_zone_offset: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_size: Option<String>,
    pub app_version: String,
    pub app_build: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier_name: Option<String>,
}

/// How a persisted log competes for batch slots and storage space.
///
/// Critical logs are handed out before normal ones and are the last to be
/// evicted when the store is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    #[default]
    Normal,
    Critical,
}

impl Priority {
    /// Value of the store's `priority` column.
    pub fn as_i64(self) -> i64 {
        match self {
            Priority::Normal => 1,
            Priority::Critical => 2,
        }
    }

    /// Unknown column values read as normal.
    pub fn from_i64(value: i64) -> Self {
        if value >= 2 {
            Priority::Critical
        } else {
            Priority::Normal
        }
    }
}

/// A single telemetry record.
///
/// `kind` is the wire `type` discriminator (`event`, `page`, `managedError`, ...).
/// Everything specific to a kind travels in `properties`, flattened into the
/// JSON object on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
    /// Relative time offset in milliseconds, only populated on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toffset: Option<i64>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
    /// Persistence priority; kept by the store, never sent.
    #[serde(skip)]
    pub priority: Priority,
}

impl Log {
    /// Create a log of the given kind with a fresh identifier.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: Some(Uuid::new_v4()),
            timestamp: None,
            sid: None,
            device: None,
            toffset: None,
            properties: Map::new(),
            priority: Priority::Normal,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Attach a kind-specific property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// The envelope sent to the ingestion endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogContainer {
    pub logs: Vec<Log>,
}

/// Logs fetched from a [`LogStore`](crate::traits::LogStore) and marked pending
/// under a store-generated batch identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct LogBatch {
    pub batch_id: String,
    pub logs: Vec<Log>,
}

/// A successful ingestion answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestionResponse {
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

/// Resource token granting access to one document partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResult {
    pub partition: String,
    #[serde(default)]
    pub db_account: Option<String>,
    #[serde(default)]
    pub db_name: Option<String>,
    #[serde(default)]
    pub db_collection_name: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub expires_on: DateTime<Utc>,
    #[serde(default)]
    pub account_id: Option<String>,
}

impl TokenResult {
    /// A token is usable only when every addressing field is present.
    pub fn is_valid(&self) -> bool {
        self.db_account.is_some()
            && self.db_name.is_some()
            && self.db_collection_name.is_some()
            && self.token.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_on
    }
}

/// One page of a remote document listing, still in wire form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemotePage {
    pub payload: String,
    pub continuation_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn adapter_type_display_round_trip() {
        for variant in [
            AdapterType::LogStore,
            AdapterType::Ingestion,
            AdapterType::DocumentCache,
            AdapterType::DocumentRemote,
            AdapterType::TokenExchange,
        ] {
            let parsed = AdapterType::from_str(&variant.to_string()).unwrap();
            assert_eq!(parsed, variant);
        }
    }

    #[test]
    fn log_properties_are_flattened_on_the_wire() {
        let log = Log::new("event")
            .with_property("name", "click")
            .with_property("count", 3);
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["name"], "click");
        assert_eq!(json["count"], 3);
        assert!(json.get("device").is_none());

        let back: Log = serde_json::from_value(json).unwrap();
        assert_eq!(back, log);
    }

    #[test]
    fn priority_stays_off_the_wire() {
        let log = Log::new("managedError").with_priority(Priority::Critical);
        let json = serde_json::to_value(&log).unwrap();
        assert!(json.get("priority").is_none());

        let back: Log = serde_json::from_value(json).unwrap();
        assert_eq!(back.priority, Priority::Normal);
        assert_eq!(Priority::from_i64(Priority::Critical.as_i64()), Priority::Critical);
        assert_eq!(Priority::from_i64(0), Priority::Normal);
    }

    #[test]
    fn token_validity_requires_all_addressing_fields() {
        let mut token = TokenResult {
            partition: "readonly".into(),
            db_account: Some("account".into()),
            db_name: Some("db".into()),
            db_collection_name: Some("collection".into()),
            token: Some("secret".into()),
            status: Some("Succeed".into()),
            expires_on: Utc::now() + chrono::Duration::hours(1),
            account_id: None,
        };
        assert!(token.is_valid());
        assert!(!token.is_expired_at(Utc::now()));

        token.db_name = None;
        assert!(!token.is_valid());
    }

    #[test]
    fn token_deserializes_from_camel_case() {
        let json = r#"{
            "partition": "user-123",
            "dbAccount": "acc",
            "dbName": "db",
            "dbCollectionName": "coll",
            "token": "t",
            "status": "Succeed",
            "expiresOn": "2030-01-01T00:00:00Z",
            "accountId": "123"
        }"#;
        let token: TokenResult = serde_json::from_str(json).unwrap();
        assert_eq!(token.db_collection_name.as_deref(), Some("coll"));
        assert_eq!(token.account_id.as_deref(), Some("123"));
    }
}
