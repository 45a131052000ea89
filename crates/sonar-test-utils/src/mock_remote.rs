// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory document service and token exchange.
//!
//! `MockDocumentRemote` behaves like a small document database: creates
//! conflict on existing ids, reads and deletes of unknown ids answer 404,
//! and every write gets a fresh etag. Failures can be scripted per call and
//! calls can be parked until the test releases them.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Notify;

use sonar_core::{DocumentRemote, RemotePage, SonarError, TokenExchange, TokenResult};

use crate::wait_until;

/// One call observed by [`MockDocumentRemote`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Read { partition: String, id: String },
    Write { payload: Value, upsert: bool },
    Delete { partition: String, id: String },
    List { partition: String, continuation: Option<String> },
}

struct StoredDocument {
    document: Value,
    etag: String,
    timestamp: i64,
}

#[derive(Default)]
pub struct MockDocumentRemote {
    documents: Mutex<BTreeMap<(String, String), StoredDocument>>,
    calls: Mutex<Vec<RemoteCall>>,
    failures: Mutex<VecDeque<u16>>,
    page_size: Mutex<Option<usize>>,
    next_etag: AtomicU64,
    hold: AtomicBool,
    gate: Notify,
}

impl MockDocumentRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a document as if another device had written it.
    pub fn insert(&self, partition: &str, id: &str, document: Value) -> String {
        let etag = self.fresh_etag();
        self.documents.lock().unwrap().insert(
            (partition.to_string(), id.to_string()),
            StoredDocument {
                document,
                etag: etag.clone(),
                timestamp: Utc::now().timestamp(),
            },
        );
        etag
    }

    pub fn contains(&self, partition: &str, id: &str) -> bool {
        self.documents
            .lock()
            .unwrap()
            .contains_key(&(partition.to_string(), id.to_string()))
    }

    /// Answer the next call with this HTTP status instead of serving it.
    pub fn fail_next(&self, status: u16) {
        self.failures.lock().unwrap().push_back(status);
    }

    /// Split listings into pages of `size` documents.
    pub fn set_page_size(&self, size: usize) {
        *self.page_size.lock().unwrap() = Some(size.max(1));
    }

    /// Park every following call until [`release_all`](Self::release_all).
    pub fn hold_calls(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    /// Stop parking calls and wake the parked ones.
    pub fn release_all(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.gate.notify_waiters();
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.call_count() >= count).await
    }

    fn fresh_etag(&self) -> String {
        format!("\"etag-{}\"", self.next_etag.fetch_add(1, Ordering::SeqCst))
    }

    async fn enter(&self, call: RemoteCall) -> Result<(), SonarError> {
        self.calls.lock().unwrap().push(call);
        if self.hold.load(Ordering::SeqCst) {
            let parked = self.gate.notified();
            tokio::pin!(parked);
            parked.as_mut().enable();
            if self.hold.load(Ordering::SeqCst) {
                parked.await;
            }
        }
        match self.failures.lock().unwrap().pop_front() {
            Some(status) => Err(SonarError::Http {
                status,
                body: format!("mock status {status}"),
            }),
            None => Ok(()),
        }
    }

    fn wire(partition: &str, id: &str, stored: &StoredDocument) -> Value {
        json!({
            "document": stored.document,
            "PartitionKey": partition,
            "id": id,
            "_etag": stored.etag,
            "_ts": stored.timestamp,
        })
    }

    fn not_found(id: &str) -> SonarError {
        SonarError::Http {
            status: 404,
            body: format!("document {id} not found"),
        }
    }
}

#[async_trait]
impl DocumentRemote for MockDocumentRemote {
    async fn read(&self, token: &TokenResult, document_id: &str) -> Result<String, SonarError> {
        self.enter(RemoteCall::Read {
            partition: token.partition.clone(),
            id: document_id.to_string(),
        })
        .await?;
        let documents = self.documents.lock().unwrap();
        let stored = documents
            .get(&(token.partition.clone(), document_id.to_string()))
            .ok_or_else(|| Self::not_found(document_id))?;
        Ok(Self::wire(&token.partition, document_id, stored).to_string())
    }

    async fn create_or_replace(
        &self,
        token: &TokenResult,
        payload: &str,
        upsert: bool,
    ) -> Result<String, SonarError> {
        let body: Value = serde_json::from_str(payload)
            .map_err(|e| SonarError::serialization("mock received invalid payload", e))?;
        self.enter(RemoteCall::Write {
            payload: body.clone(),
            upsert,
        })
        .await?;
        let id = body["id"].as_str().unwrap_or_default().to_string();
        let key = (token.partition.clone(), id.clone());
        if !upsert && self.documents.lock().unwrap().contains_key(&key) {
            return Err(SonarError::Http {
                status: 409,
                body: format!("document {id} already exists"),
            });
        }
        let stored = StoredDocument {
            document: body["document"].clone(),
            etag: self.fresh_etag(),
            timestamp: Utc::now().timestamp(),
        };
        let wire = Self::wire(&token.partition, &id, &stored);
        self.documents.lock().unwrap().insert(key, stored);
        Ok(wire.to_string())
    }

    async fn delete(&self, token: &TokenResult, document_id: &str) -> Result<(), SonarError> {
        self.enter(RemoteCall::Delete {
            partition: token.partition.clone(),
            id: document_id.to_string(),
        })
        .await?;
        self.documents
            .lock()
            .unwrap()
            .remove(&(token.partition.clone(), document_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(document_id))
    }

    async fn list(
        &self,
        token: &TokenResult,
        continuation_token: Option<&str>,
    ) -> Result<RemotePage, SonarError> {
        self.enter(RemoteCall::List {
            partition: token.partition.clone(),
            continuation: continuation_token.map(String::from),
        })
        .await?;
        let documents = self.documents.lock().unwrap();
        let all: Vec<Value> = documents
            .iter()
            .filter(|((partition, _), _)| *partition == token.partition)
            .map(|((partition, id), stored)| Self::wire(partition, id, stored))
            .collect();
        let start = continuation_token
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0);
        let size = self.page_size.lock().unwrap().unwrap_or(usize::MAX);
        let end = start.saturating_add(size).min(all.len());
        let page: Vec<Value> = all.get(start..end).map(<[Value]>::to_vec).unwrap_or_default();
        Ok(RemotePage {
            payload: json!({ "Documents": page }).to_string(),
            continuation_token: (end < all.len()).then(|| end.to_string()),
        })
    }
}

/// Token exchange handing out valid one-hour tokens.
///
/// With an account set, `user` partitions resolve to `user-<account>`.
#[derive(Default)]
pub struct MockTokenExchange {
    calls: AtomicUsize,
    failing: AtomicBool,
    account_id: Mutex<Option<String>>,
    base_url: Mutex<Option<String>>,
}

impl MockTokenExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_account(&self, account_id: Option<&str>) {
        *self.account_id.lock().unwrap() = account_id.map(String::from);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn base_url(&self) -> Option<String> {
        self.base_url.lock().unwrap().clone()
    }

    /// The token this exchange would hand out for `partition`.
    pub fn token_for(&self, partition: &str) -> TokenResult {
        let account_id = self.account_id.lock().unwrap().clone();
        let (partition, account_id) = match (partition, account_id) {
            ("user", Some(account)) => (format!("user-{account}"), Some(account)),
            (other, _) => (other.to_string(), None),
        };
        TokenResult {
            partition,
            db_account: Some("mock-account".into()),
            db_name: Some("mock-db".into()),
            db_collection_name: Some("mock-collection".into()),
            token: Some("mock-resource-token".into()),
            status: Some("Succeed".into()),
            expires_on: Utc::now() + chrono::Duration::hours(1),
            account_id,
        }
    }
}

#[async_trait]
impl TokenExchange for MockTokenExchange {
    async fn get_token(&self, partition: &str) -> Result<TokenResult, SonarError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SonarError::Http {
                status: 500,
                body: "token exchange unavailable".into(),
            });
        }
        Ok(self.token_for(partition))
    }

    fn set_base_url(&self, url: &str) {
        *self.base_url.lock().unwrap() = Some(url.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_conflicts_on_existing_id() {
        let remote = MockDocumentRemote::new();
        let token = MockTokenExchange::new().token_for("readonly");
        let payload = json!({"document": {"a": 1}, "PartitionKey": "readonly", "id": "d"}).to_string();
        remote.create_or_replace(&token, &payload, false).await.unwrap();
        let err = remote.create_or_replace(&token, &payload, false).await.unwrap_err();
        assert_eq!(err.http_status(), Some(409));
        assert!(remote.create_or_replace(&token, &payload, true).await.is_ok());
    }

    #[tokio::test]
    async fn listing_pages_with_continuation() {
        let remote = MockDocumentRemote::new();
        let token = MockTokenExchange::new().token_for("readonly");
        for id in ["a", "b", "c"] {
            remote.insert("readonly", id, json!({}));
        }
        remote.set_page_size(2);
        let first = remote.list(&token, None).await.unwrap();
        assert_eq!(first.continuation_token.as_deref(), Some("2"));
        let second = remote.list(&token, Some("2")).await.unwrap();
        assert!(second.continuation_token.is_none());
        assert!(second.payload.contains("\"c\""));
    }

    #[test]
    fn user_tokens_carry_account() {
        let exchange = MockTokenExchange::new();
        exchange.set_account(Some("abc"));
        let token = exchange.token_for("user");
        assert_eq!(token.partition, "user-abc");
        assert_eq!(token.account_id.as_deref(), Some("abc"));
    }
}
