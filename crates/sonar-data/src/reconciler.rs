// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Replays offline document operations against the remote service.
//!
//! Every cached row with a pending marker is one queued operation. A pass
//! scans the given tables and starts one remote call per row, skipping keys
//! that already have a call in flight, so a document never has two
//! concurrent calls.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sonar_core::{DocumentRemote, SonarError};
use sonar_storage::{DocumentCache, LocalDocument, PendingOperation};

use crate::document::{etag_of, wire_payload, DocumentMetadata};
use crate::partition::remove_account_id;
use crate::token_manager::TokenManager;

/// Notified when a queued operation reached the remote service or failed.
///
/// Exactly one of `metadata` and `error` is present.
pub trait RemoteOperationListener: Send + Sync + 'static {
    fn on_remote_operation_completed(
        &self,
        operation: PendingOperation,
        metadata: Option<&DocumentMetadata>,
        error: Option<&SonarError>,
    );
}

type SharedListener = Arc<RwLock<Option<Arc<dyn RemoteOperationListener>>>>;

/// One in-flight sync call. The generation tells a call apart from a later
/// one started for the same key after a cancellation.
struct Outgoing {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct SyncReconciler {
    cache: DocumentCache,
    tokens: TokenManager,
    remote: Arc<dyn DocumentRemote>,
    outgoing: Arc<DashMap<String, Outgoing>>,
    generations: Arc<AtomicU64>,
    listener: SharedListener,
}

impl SyncReconciler {
    pub fn new(cache: DocumentCache, tokens: TokenManager, remote: Arc<dyn DocumentRemote>) -> Self {
        Self {
            cache,
            tokens,
            remote,
            outgoing: Arc::new(DashMap::new()),
            generations: Arc::new(AtomicU64::new(0)),
            listener: Arc::new(RwLock::new(None)),
        }
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn RemoteOperationListener>>) {
        let mut guard = self
            .listener
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = listener;
    }

    /// Number of documents with a sync call in flight.
    pub fn in_flight(&self) -> usize {
        self.outgoing.len()
    }

    /// Whether a call for (partition, document id) is in flight.
    pub fn is_outgoing(&self, key: &str) -> bool {
        self.outgoing.contains_key(key)
    }

    /// Start a call for every pending row of `tables` that has none in flight.
    ///
    /// Returns the number of calls started. Calls complete in the background.
    pub async fn process_pending_operations(&self, tables: &[String]) -> Result<usize, SonarError> {
        let mut started = 0;
        for table in tables {
            for doc in self.cache.pending_operations(table).await? {
                let Some(operation) = doc.pending_operation else {
                    continue;
                };
                let (generation, cancel) = match self.outgoing.entry(doc.outgoing_id()) {
                    Entry::Occupied(_) => {
                        debug!(
                            partition = %doc.partition,
                            id = %doc.document_id,
                            "sync call already in flight, skipping"
                        );
                        continue;
                    }
                    Entry::Vacant(slot) => {
                        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                        let cancel = CancellationToken::new();
                        slot.insert(Outgoing {
                            generation,
                            cancel: cancel.clone(),
                        });
                        (generation, cancel)
                    }
                };
                debug!(%operation, partition = %doc.partition, id = %doc.document_id, "syncing pending operation");
                tokio::spawn(self.clone().sync(doc, operation, generation, cancel));
                started += 1;
            }
        }
        if started > 0 {
            info!(started, "pending document operations dispatched");
        }
        Ok(started)
    }

    /// Cancel every in-flight sync call and forget them.
    ///
    /// Cancelled calls leave their rows pending for the next pass.
    pub fn cancel_all(&self) {
        let mut cancelled = 0usize;
        self.outgoing.retain(|_, call| {
            call.cancel.cancel();
            cancelled += 1;
            false
        });
        if cancelled > 0 {
            debug!(cancelled, "outgoing sync calls cancelled");
        }
    }

    async fn sync(
        self,
        doc: LocalDocument,
        operation: PendingOperation,
        generation: u64,
        cancel: CancellationToken,
    ) {
        let key = doc.outgoing_id();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = self.call_remote(&doc, operation) => Some(r),
        };
        match outcome {
            _ if cancel.is_cancelled() => debug!(key = %key, "sync call cancelled"),
            Some(Ok(etag)) => self.on_success(doc, operation, etag, &cancel).await,
            Some(Err(e)) => self.on_failure(&doc, operation, e, &cancel).await,
            None => {}
        }
        // A cancelled call's key may already belong to a newer call.
        self.outgoing
            .remove_if(&key, |_, call| call.generation == generation);
    }

    async fn call_remote(
        &self,
        doc: &LocalDocument,
        operation: PendingOperation,
    ) -> Result<Option<String>, SonarError> {
        let token = self.tokens.resolve(remove_account_id(&doc.partition)).await?;
        match operation {
            PendingOperation::Create | PendingOperation::Replace => {
                let document = match doc.document.as_deref() {
                    Some(raw) => serde_json::from_str::<Value>(raw).map_err(|e| {
                        SonarError::serialization("failed to decode pending document", e)
                    })?,
                    None => Value::Null,
                };
                let payload =
                    wire_payload(&doc.partition, &doc.document_id, document, doc.etag.as_deref())?;
                let body = self
                    .remote
                    .create_or_replace(&token, &payload, operation == PendingOperation::Replace)
                    .await?;
                Ok(etag_of(&body))
            }
            PendingOperation::Delete => {
                self.remote.delete(&token, &doc.document_id).await?;
                Ok(None)
            }
        }
    }

    async fn on_success(
        &self,
        doc: LocalDocument,
        operation: PendingOperation,
        etag: Option<String>,
        cancel: &CancellationToken,
    ) {
        let metadata = DocumentMetadata {
            partition: doc.partition.clone(),
            id: doc.document_id.clone(),
            etag: etag.clone(),
        };
        self.notify(operation, Some(&metadata), None);
        if cancel.is_cancelled() {
            return;
        }

        let result = if doc.is_expired() || operation == PendingOperation::Delete {
            self.cache.remove_synced(&doc).await
        } else {
            self.cache.settle_synced(&doc, etag).await
        };
        match result {
            Ok(true) => {}
            Ok(false) => debug!(
                id = %doc.document_id,
                "document changed while syncing, newer operation stays queued"
            ),
            Err(e) => warn!(id = %doc.document_id, error = %e, "failed to settle synced document"),
        }
    }

    async fn on_failure(
        &self,
        doc: &LocalDocument,
        operation: PendingOperation,
        e: SonarError,
        cancel: &CancellationToken,
    ) {
        error!(%operation, id = %doc.document_id, error = %e, "remote operation failed");
        let server_gone = matches!(e.http_status(), Some(404 | 409));
        self.notify(operation, None, Some(&e));
        if cancel.is_cancelled() || !(server_gone || doc.is_expired()) {
            return;
        }
        if let Err(e) = self.cache.remove_synced(doc).await {
            warn!(id = %doc.document_id, error = %e, "failed to purge rejected document");
        }
    }

    fn notify(
        &self,
        operation: PendingOperation,
        metadata: Option<&DocumentMetadata>,
        error: Option<&SonarError>,
    ) {
        let listener = self
            .listener
            .read()
            .map(|l| l.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());
        let Some(listener) = listener else {
            return;
        };
        let call = AssertUnwindSafe(|| listener.on_remote_operation_completed(operation, metadata, error));
        if catch_unwind(call).is_err() {
            error!(%operation, "remote operation listener panicked");
        }
    }
}
