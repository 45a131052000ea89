// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document results, options and the remote document wire format.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use sonar_core::{SonarError, TokenResult};
use sonar_storage::{CachedDocument, LocalDocument, PendingOperation, TimeToLive};

/// A document together with its sync metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentWrapper<T> {
    /// `None` for deletes and tombstones.
    pub document: Option<T>,
    pub partition: String,
    pub id: String,
    pub etag: Option<String>,
    /// Seconds since the Unix epoch of the last server or local change.
    pub last_updated_secs: i64,
    /// Served from the device cache rather than the remote service.
    pub from_device_cache: bool,
    /// Operation still waiting to be synced, if any.
    pub pending_operation: Option<PendingOperation>,
}

impl<T> DocumentWrapper<T> {
    /// Turn a cached row into a result, decoding its payload.
    ///
    /// A payload that does not decode as `T` is a [`SonarError::CacheRead`].
    pub(crate) fn from_local(row: &LocalDocument) -> Result<Self, SonarError>
    where
        T: DeserializeOwned,
    {
        let document = match row.document.as_deref() {
            Some(raw) => Some(serde_json::from_str::<T>(raw).map_err(|e| {
                SonarError::CacheRead {
                    message: format!(
                        "cached document '{}' could not be decoded",
                        row.document_id
                    ),
                    source: Some(Box::new(e)),
                }
            })?),
            None => None,
        };
        Ok(Self {
            document,
            partition: row.partition.clone(),
            id: row.document_id.clone(),
            etag: row.etag.clone(),
            last_updated_secs: row.operation_time / 1000,
            from_device_cache: true,
            pending_operation: row.pending_operation,
        })
    }
}

/// Identifies a document whose pending operation reached the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub partition: String,
    pub id: String,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Device cache lifetime applied to documents read through the cache.
    pub ttl: TimeToLive,
}

impl ReadOptions {
    pub fn new(ttl: TimeToLive) -> Self {
        Self { ttl }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Device cache lifetime of the written document.
    pub ttl: TimeToLive,
}

impl WriteOptions {
    pub fn new(ttl: TimeToLive) -> Self {
        Self { ttl }
    }
}

/// One page of a partition listing.
#[derive(Debug, Clone)]
pub struct PaginatedDocuments<T> {
    pub items: Vec<DocumentWrapper<T>>,
    /// Present when the remote service has more pages.
    pub continuation_token: Option<String>,
    pub(crate) token: Option<TokenResult>,
    pub(crate) ttl: TimeToLive,
}

impl<T> PaginatedDocuments<T> {
    pub(crate) fn local(items: Vec<DocumentWrapper<T>>) -> Self {
        Self {
            items,
            continuation_token: None,
            token: None,
            ttl: TimeToLive::default(),
        }
    }

    pub fn has_next_page(&self) -> bool {
        self.continuation_token.is_some()
    }
}

/// A document as the remote service stores it.
///
/// `PartitionKey`, `id` and `_ts` are mandatory on the way in; the payload
/// itself may be null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RemoteDocument {
    #[serde(default)]
    pub document: Option<Value>,
    #[serde(rename = "PartitionKey", default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "_etag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(rename = "_ts", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// A remote document with its mandatory fields checked.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedDocument {
    pub partition: String,
    pub id: String,
    pub etag: Option<String>,
    pub timestamp_secs: i64,
    pub document: Option<Value>,
}

impl ParsedDocument {
    pub fn parse(payload: &str) -> Result<Self, SonarError> {
        let remote: RemoteDocument = serde_json::from_str(payload)
            .map_err(|e| SonarError::serialization("failed to deserialize document", e))?;
        Self::try_from(remote)
    }

    /// Cache row content; the payload is stored in wire form.
    pub fn to_cached(&self) -> CachedDocument {
        CachedDocument {
            partition: self.partition.clone(),
            document_id: self.id.clone(),
            document: self.document.as_ref().map(Value::to_string),
            etag: self.etag.clone(),
            last_updated_ms: self.timestamp_secs.saturating_mul(1000),
        }
    }

    pub fn into_wrapper<T: DeserializeOwned>(self) -> Result<DocumentWrapper<T>, SonarError> {
        let document = match self.document {
            Some(value) => Some(
                serde_json::from_value::<T>(value)
                    .map_err(|e| SonarError::serialization("failed to deserialize document", e))?,
            ),
            None => None,
        };
        Ok(DocumentWrapper {
            document,
            partition: self.partition,
            id: self.id,
            etag: self.etag,
            last_updated_secs: self.timestamp_secs,
            from_device_cache: false,
            pending_operation: None,
        })
    }
}

impl TryFrom<RemoteDocument> for ParsedDocument {
    type Error = SonarError;

    fn try_from(remote: RemoteDocument) -> Result<Self, Self::Error> {
        let missing = |field: &str| SonarError::Serialization {
            message: format!("failed to deserialize document: missing {field}"),
            source: None,
        };
        Ok(Self {
            partition: remote.partition.ok_or_else(|| missing("PartitionKey"))?,
            id: remote.id.ok_or_else(|| missing("id"))?,
            timestamp_secs: remote.timestamp.ok_or_else(|| missing("_ts"))?,
            etag: remote.etag,
            document: remote.document.filter(|v| !v.is_null()),
        })
    }
}

#[derive(Deserialize)]
struct RemoteListing {
    #[serde(rename = "Documents", default)]
    documents: Vec<Value>,
}

/// Decode a listing page. Entries missing mandatory fields are skipped.
pub(crate) fn parse_page(payload: &str) -> Result<Vec<ParsedDocument>, SonarError> {
    let listing: RemoteListing = serde_json::from_str(payload)
        .map_err(|e| SonarError::serialization("failed to deserialize document list", e))?;
    let mut parsed = Vec::with_capacity(listing.documents.len());
    for value in listing.documents {
        match serde_json::from_value::<RemoteDocument>(value)
            .map_err(|e| SonarError::serialization("failed to deserialize document", e))
            .and_then(ParsedDocument::try_from)
        {
            Ok(doc) => parsed.push(doc),
            Err(e) => warn!(error = %e, "skipping undecodable document in listing"),
        }
    }
    Ok(parsed)
}

/// Body of a create or replace call.
pub(crate) fn wire_payload(
    partition: &str,
    id: &str,
    document: Value,
    etag: Option<&str>,
) -> Result<String, SonarError> {
    let remote = RemoteDocument {
        document: Some(document),
        partition: Some(partition.to_string()),
        id: Some(id.to_string()),
        etag: etag.map(String::from),
        timestamp: None,
    };
    serde_json::to_string(&remote)
        .map_err(|e| SonarError::serialization("failed to serialize document", e))
}

/// `_etag` of a response body, if it has one.
pub(crate) fn etag_of(payload: &str) -> Option<String> {
    serde_json::from_str::<RemoteDocument>(payload)
        .ok()
        .and_then(|remote| remote.etag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Note {
        title: String,
    }

    #[test]
    fn parses_remote_document() {
        let payload = json!({
            "document": {"title": "hello"},
            "PartitionKey": "readonly",
            "id": "doc1",
            "_etag": "\"0400\"",
            "_ts": 1_550_000_000
        })
        .to_string();
        let parsed = ParsedDocument::parse(&payload).unwrap();
        let cached = parsed.to_cached();
        assert_eq!(cached.last_updated_ms, 1_550_000_000_000);
        assert_eq!(cached.document.as_deref(), Some(r#"{"title":"hello"}"#));

        let wrapper: DocumentWrapper<Note> = parsed.into_wrapper().unwrap();
        assert_eq!(wrapper.document.unwrap().title, "hello");
        assert_eq!(wrapper.etag.as_deref(), Some("\"0400\""));
        assert!(!wrapper.from_device_cache);
    }

    #[test]
    fn missing_timestamp_is_a_serialization_error() {
        let payload = json!({"document": {}, "PartitionKey": "readonly", "id": "doc1"}).to_string();
        let err = ParsedDocument::parse(&payload).unwrap_err();
        assert!(matches!(err, SonarError::Serialization { .. }));
        assert!(err.to_string().contains("_ts"));
    }

    #[test]
    fn null_payload_is_allowed() {
        let payload =
            json!({"document": null, "PartitionKey": "readonly", "id": "d", "_ts": 1}).to_string();
        let wrapper: DocumentWrapper<Note> = ParsedDocument::parse(&payload)
            .unwrap()
            .into_wrapper()
            .unwrap();
        assert!(wrapper.document.is_none());
    }

    #[traced_test]
    #[test]
    fn page_skips_bad_entries() {
        let payload = json!({"Documents": [
            {"document": {"title": "a"}, "PartitionKey": "readonly", "id": "a", "_ts": 1},
            {"document": {"title": "b"}, "id": "b", "_ts": 2}
        ]})
        .to_string();
        let page = parse_page(&payload).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "a");
        assert!(logs_contain("skipping undecodable document in listing"));
    }

    #[test]
    fn wire_payload_carries_etag_only_when_known() {
        let body = wire_payload("readonly", "doc1", json!({"title": "x"}), None).unwrap();
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["PartitionKey"], "readonly");
        assert!(value.get("_etag").is_none());

        let body = wire_payload("readonly", "doc1", json!(1), Some("e1")).unwrap();
        assert_eq!(etag_of(&body).as_deref(), Some("e1"));
        assert_eq!(etag_of(""), None);
    }

    #[test]
    fn local_rows_decode_or_report_cache_read() {
        let mut row = LocalDocument {
            table: "app_documents".into(),
            partition: "readonly".into(),
            document_id: "doc1".into(),
            document: Some(r#"{"title":"cached"}"#.into()),
            etag: None,
            expiration_time: -1,
            download_time: 5_000,
            operation_time: 5_000,
            pending_operation: Some(PendingOperation::Create),
        };
        let wrapper = DocumentWrapper::<Note>::from_local(&row).unwrap();
        assert!(wrapper.from_device_cache);
        assert_eq!(wrapper.last_updated_secs, 5);
        assert_eq!(wrapper.pending_operation, Some(PendingOperation::Create));

        row.document = Some("not json".into());
        assert!(matches!(
            DocumentWrapper::<Note>::from_local(&row),
            Err(SonarError::CacheRead { .. })
        ));
    }
}
