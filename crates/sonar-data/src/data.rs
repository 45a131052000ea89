// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Offline-first document API.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sonar_config::SonarConfig;
use sonar_core::{DocumentRemote, NetworkStateProvider, SonarError, TokenExchange, TokenResult};
use sonar_storage::{
    has_pending_write, now_ms, user_table_name, DocumentCache, LocalDocument, PendingOperation,
    TimeToLive, TokenCache, READONLY_TABLE,
};

use crate::document::{
    parse_page, wire_payload, DocumentWrapper, PaginatedDocuments, ParsedDocument, ReadOptions,
    WriteOptions,
};
use crate::partition::{self, table_for_token, USER};
use crate::reconciler::{RemoteOperationListener, SyncReconciler};
use crate::token_manager::TokenManager;

/// Collaborators the document store is written against.
pub struct DataDeps {
    pub cache: DocumentCache,
    pub remote: Arc<dyn DocumentRemote>,
    pub exchange: Arc<dyn TokenExchange>,
    pub network: Arc<dyn NetworkStateProvider>,
}

#[derive(Debug, Clone)]
pub struct DataSettings {
    /// Every operation fails with [`SonarError::Disabled`] until one is known.
    pub app_secret: Option<String>,
    pub enabled: bool,
    /// Cache lifetime used when an operation passes no options.
    pub default_ttl: TimeToLive,
}

impl DataSettings {
    pub fn from_config(config: &SonarConfig) -> Self {
        Self {
            app_secret: config.sdk.app_secret.clone(),
            enabled: config.data.enabled,
            default_ttl: TimeToLive::from_secs(config.data.document_ttl_secs),
        }
    }
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            app_secret: None,
            enabled: true,
            default_ttl: TimeToLive::DEFAULT,
        }
    }
}

struct Inner {
    cache: DocumentCache,
    tokens: TokenManager,
    remote: Arc<dyn DocumentRemote>,
    network: Arc<dyn NetworkStateProvider>,
    reconciler: SyncReconciler,
    app_secret: Option<String>,
    default_ttl: TimeToLive,
    enabled: AtomicBool,
    /// Cancelled on disable; user calls race against it.
    calls: RwLock<CancellationToken>,
    account: tokio::sync::RwLock<Option<String>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn call_token(&self) -> CancellationToken {
        self.calls
            .read()
            .map(|token| token.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn replace_watcher(&self, handle: Option<JoinHandle<()>>) {
        let mut guard = self
            .watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(old) = std::mem::replace(&mut *guard, handle) {
            old.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.call_token().cancel();
        self.reconciler.cancel_all();
        self.replace_watcher(None);
    }
}

/// Reads and writes documents through the device cache, falling back to
/// queued offline operations when the network is unavailable.
///
/// Cloning is cheap; clones share one cache and one reconciler. Every
/// operation completes: a disable while a call is in flight ends it with
/// [`SonarError::Cancelled`].
#[derive(Clone)]
pub struct DataStore {
    inner: Arc<Inner>,
}

impl DataStore {
    /// Build the store; when `settings.enabled` it starts watching the
    /// network and syncs right away if connected.
    pub async fn start(deps: DataDeps, settings: DataSettings) -> Self {
        let tokens = TokenManager::new(TokenCache::new(deps.cache.database().clone()), deps.exchange);
        let reconciler = SyncReconciler::new(deps.cache.clone(), tokens.clone(), deps.remote.clone());
        let store = Self {
            inner: Arc::new(Inner {
                cache: deps.cache,
                tokens,
                remote: deps.remote,
                network: deps.network,
                reconciler,
                app_secret: settings.app_secret,
                default_ttl: settings.default_ttl,
                enabled: AtomicBool::new(false),
                calls: RwLock::new(CancellationToken::new()),
                account: tokio::sync::RwLock::new(None),
                watcher: Mutex::new(None),
            }),
        };
        if settings.enabled {
            store.set_enabled(true).await;
        }
        store
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Number of queued operations with a sync call in flight.
    pub fn outgoing_count(&self) -> usize {
        self.inner.reconciler.in_flight()
    }

    pub fn set_remote_operation_listener(&self, listener: Option<Arc<dyn RemoteOperationListener>>) {
        self.inner.reconciler.set_listener(listener);
    }

    pub fn set_token_exchange_url(&self, url: &str) {
        self.inner.tokens.exchange().set_base_url(url);
    }

    /// Enable or disable the store.
    ///
    /// Disabling cancels in-flight calls and forgets outgoing sync calls;
    /// queued operations stay in the cache. Enabling watches the network
    /// again and syncs if connected.
    pub async fn set_enabled(&self, enabled: bool) {
        if self.inner.enabled.swap(enabled, Ordering::AcqRel) == enabled {
            return;
        }
        if enabled {
            {
                let mut calls = self
                    .inner
                    .calls
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                *calls = CancellationToken::new();
            }
            self.spawn_network_watcher();
            info!("data store enabled");
            if self.inner.network.is_connected() {
                if let Err(e) = self.process_pending_operations().await {
                    warn!(error = %e, "failed to sync pending operations");
                }
            }
        } else {
            self.inner.call_token().cancel();
            self.inner.reconciler.cancel_all();
            self.inner.replace_watcher(None);
            info!("data store disabled");
        }
    }

    fn spawn_network_watcher(&self) {
        let mut changes = self.inner.network.subscribe();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let connected = *changes.borrow_and_update();
                debug!(connected, "network state changed");
                if !connected {
                    continue;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let store = DataStore { inner };
                if let Err(e) = store.process_pending_operations().await {
                    warn!(error = %e, "failed to sync pending operations");
                }
            }
        });
        self.inner.replace_watcher(Some(handle));
    }

    /// Sign a user in (`Some`) or out (`None`).
    ///
    /// Signing out, or switching to a different account, drops every user
    /// token and resets the cache. A signed-in user gets a cache table.
    pub async fn set_account(&self, account_id: Option<&str>) -> Result<(), SonarError> {
        let mut current = self.inner.account.write().await;
        let switching = current.is_some() && current.as_deref() != account_id;
        if account_id.is_none() || switching {
            self.inner.reconciler.cancel_all();
            self.inner.tokens.remove_all_cached_tokens().await?;
            self.inner.cache.reset().await?;
            debug!("user documents and tokens cleared");
        }
        if let Some(account) = account_id {
            self.inner.cache.create_user_table(account).await?;
        }
        *current = account_id.map(String::from);
        Ok(())
    }

    /// Start a sync call for every queued operation without one in flight.
    pub async fn process_pending_operations(&self) -> Result<usize, SonarError> {
        if !self.is_enabled() {
            debug!("data store disabled, not syncing");
            return Ok(0);
        }
        let mut tables = vec![READONLY_TABLE.to_string()];
        if let Some(account) = self.inner.account.read().await.as_deref() {
            tables.push(user_table_name(account));
        }
        self.inner.reconciler.process_pending_operations(&tables).await
    }

    fn check(&self, partition: &str, document_id: Option<&str>) -> Result<(), SonarError> {
        if self.inner.app_secret.is_none() {
            return Err(SonarError::Disabled("data store has no app secret".into()));
        }
        if !self.is_enabled() {
            return Err(SonarError::Disabled("data store is disabled".into()));
        }
        partition::validate(partition, document_id)
    }

    async fn cancellable<R>(
        &self,
        call: impl Future<Output = Result<R, SonarError>>,
    ) -> Result<R, SonarError> {
        let cancel = self.inner.call_token();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SonarError::Cancelled),
            r = call => r,
        }
    }

    fn is_online(&self) -> bool {
        self.inner.network.is_connected()
    }

    fn ttl(&self, ttl: Option<TimeToLive>) -> TimeToLive {
        ttl.unwrap_or(self.inner.default_ttl)
    }

    /// Cached token (expired allowed) and the cached row it addresses.
    async fn lookup(
        &self,
        partition: &str,
        document_id: &str,
        read_ttl: Option<TimeToLive>,
    ) -> Result<(TokenResult, String, Result<LocalDocument, SonarError>), SonarError> {
        let Some(token) = self.inner.tokens.get_cached_token(partition, true).await else {
            warn!(partition, "no cached token for partition");
            return Err(no_partition(partition));
        };
        let table = table_for_token(&token)?;
        let cached = self
            .inner
            .cache
            .read(&table, &token.partition, document_id, read_ttl)
            .await
            .and_then(|doc| {
                if doc.pending_operation == Some(PendingOperation::Delete) {
                    Err(SonarError::NotFound(
                        "document is in the cache but marked as deleted".into(),
                    ))
                } else {
                    Ok(doc)
                }
            });
        Ok((token, table, cached))
    }

    /// Decode a cached row, evicting it when its payload is unreadable.
    async fn decode_local<T: DeserializeOwned>(
        &self,
        row: &LocalDocument,
    ) -> Result<DocumentWrapper<T>, SonarError> {
        match DocumentWrapper::from_local(row) {
            Err(e @ SonarError::CacheRead { .. }) => {
                warn!(id = %row.document_id, error = %e, "evicting undecodable cached document");
                if let Err(e) = self
                    .inner
                    .cache
                    .delete_online(&row.table, &row.partition, &row.document_id)
                    .await
                {
                    warn!(id = %row.document_id, error = %e, "failed to evict cached document");
                }
                Err(e)
            }
            other => other,
        }
    }

    /// Read a document, from the remote service when online and nothing is
    /// queued for it, from the cache otherwise.
    pub async fn read<T: DeserializeOwned>(
        &self,
        document_id: &str,
        partition: &str,
        options: Option<ReadOptions>,
    ) -> Result<DocumentWrapper<T>, SonarError> {
        self.check(partition, Some(document_id))?;
        self.cancellable(async {
            let read_ttl = options.map(|o| o.ttl);
            let cached = self.lookup(partition, document_id, read_ttl).await;
            let needs_remote = !matches!(&cached, Ok((_, _, Ok(row))) if row.has_pending_operation());
            if needs_remote && self.is_online() {
                return self.remote_read(partition, document_id).await;
            }
            let (_, _, row) = cached?;
            self.decode_local(&row?).await
        })
        .await
    }

    async fn remote_read<T: DeserializeOwned>(
        &self,
        partition: &str,
        document_id: &str,
    ) -> Result<DocumentWrapper<T>, SonarError> {
        let token = self.inner.tokens.resolve(partition).await?;
        let payload = self.inner.remote.read(&token, document_id).await?;
        let parsed = ParsedDocument::parse(&payload)?;
        let cached = parsed.to_cached();
        let wrapper = parsed.into_wrapper::<T>()?;
        self.write_through(&token, &cached, self.inner.default_ttl).await;
        Ok(wrapper)
    }

    async fn write_through(
        &self,
        token: &TokenResult,
        doc: &sonar_storage::CachedDocument,
        ttl: TimeToLive,
    ) {
        let written = match table_for_token(token) {
            Ok(table) => self.inner.cache.write_online(&table, doc, ttl).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(id = %doc.document_id, error = %e, "failed to cache document");
        }
    }

    /// First page of a partition.
    ///
    /// Served from the cache while offline or while any cached document of
    /// the partition has an unsynced write.
    pub async fn list<T: DeserializeOwned>(
        &self,
        partition: &str,
        options: Option<ReadOptions>,
    ) -> Result<PaginatedDocuments<T>, SonarError> {
        self.check(partition, None)?;
        self.cancellable(async {
            let table = if partition == USER {
                match self.inner.account.read().await.as_deref() {
                    Some(account) => user_table_name(account),
                    None => {
                        return Err(SonarError::InvalidArgument(
                            "list requested on the user partition, but no user is signed in"
                                .into(),
                        ));
                    }
                }
            } else {
                READONLY_TABLE.to_string()
            };
            let ttl = self.ttl(options.map(|o| o.ttl));
            let online = self.is_online();
            let cached_token = self.inner.tokens.get_cached_token(partition, true).await;
            let local = match &cached_token {
                Some(token) => {
                    self.inner
                        .cache
                        .documents_by_partition(&table, &token.partition, ttl)
                        .await?
                }
                None if !online => {
                    return Err(SonarError::Network {
                        message: format!("list requested on partition '{partition}' without network"),
                        source: None,
                    });
                }
                None => Vec::new(),
            };
            if has_pending_write(&local) || !online {
                let mut items = Vec::with_capacity(local.len());
                for row in local.iter().filter(|row| !row.is_expired()) {
                    match DocumentWrapper::from_local(row) {
                        Ok(item) => items.push(item),
                        Err(e) => warn!(id = %row.document_id, error = %e, "skipping undecodable cached document"),
                    }
                }
                return Ok(PaginatedDocuments::local(items));
            }
            let token = self.inner.tokens.resolve(partition).await?;
            self.fetch_page(token, None, ttl).await
        })
        .await
    }

    /// The page following `page`. Only available online.
    pub async fn next_page<T: DeserializeOwned>(
        &self,
        page: &PaginatedDocuments<T>,
    ) -> Result<PaginatedDocuments<T>, SonarError> {
        let (Some(continuation), Some(token)) = (&page.continuation_token, &page.token) else {
            return Err(SonarError::InvalidArgument("no next page to load".into()));
        };
        self.check(partition::remove_account_id(&token.partition), None)?;
        if !self.is_online() {
            return Err(SonarError::Network {
                message: "listing the next page is not supported offline".into(),
                source: None,
            });
        }
        self.cancellable(self.fetch_page(token.clone(), Some(continuation.as_str()), page.ttl))
            .await
    }

    async fn fetch_page<T: DeserializeOwned>(
        &self,
        token: TokenResult,
        continuation: Option<&str>,
        ttl: TimeToLive,
    ) -> Result<PaginatedDocuments<T>, SonarError> {
        let page = self.inner.remote.list(&token, continuation).await?;
        let mut items = Vec::new();
        for doc in parse_page(&page.payload)? {
            let cached = doc.to_cached();
            match doc.into_wrapper::<T>() {
                Ok(item) => {
                    self.write_through(&token, &cached, ttl).await;
                    items.push(item);
                }
                Err(e) => warn!(id = %cached.document_id, error = %e, "skipping undecodable document"),
            }
        }
        debug!(count = items.len(), more = page.continuation_token.is_some(), "document page loaded");
        Ok(PaginatedDocuments {
            items,
            continuation_token: page.continuation_token,
            token: Some(token),
            ttl,
        })
    }

    /// Create a document, or queue the creation while offline.
    pub async fn create<T: Serialize + DeserializeOwned>(
        &self,
        document_id: &str,
        document: &T,
        partition: &str,
        options: Option<WriteOptions>,
    ) -> Result<DocumentWrapper<T>, SonarError> {
        self.create_or_replace(document_id, document, partition, options, false)
            .await
    }

    /// Replace (or upsert) a document, or queue the replacement while offline.
    pub async fn replace<T: Serialize + DeserializeOwned>(
        &self,
        document_id: &str,
        document: &T,
        partition: &str,
        options: Option<WriteOptions>,
    ) -> Result<DocumentWrapper<T>, SonarError> {
        self.create_or_replace(document_id, document, partition, options, true)
            .await
    }

    async fn create_or_replace<T: Serialize + DeserializeOwned>(
        &self,
        document_id: &str,
        document: &T,
        partition: &str,
        options: Option<WriteOptions>,
        upsert: bool,
    ) -> Result<DocumentWrapper<T>, SonarError> {
        self.check(partition, Some(document_id))?;
        let value = serde_json::to_value(document)
            .map_err(|e| SonarError::serialization("failed to serialize document", e))?;
        let ttl = self.ttl(options.map(|o| o.ttl));
        self.cancellable(async {
            if self.is_online() {
                let token = self.inner.tokens.resolve(partition).await?;
                let payload = wire_payload(&token.partition, document_id, value, None)?;
                let body = self
                    .inner
                    .remote
                    .create_or_replace(&token, &payload, upsert)
                    .await?;
                let parsed = ParsedDocument::parse(&body)?;
                let cached = parsed.to_cached();
                let wrapper = parsed.into_wrapper::<T>()?;
                self.write_through(&token, &cached, ttl).await;
                return Ok(wrapper);
            }
            let Some(token) = self.inner.tokens.get_cached_token(partition, true).await else {
                return Err(no_partition(partition));
            };
            let table = table_for_token(&token)?;
            let row = self
                .inner
                .cache
                .create_or_update_offline(&table, &token.partition, document_id, &value.to_string(), ttl)
                .await?;
            debug!(id = document_id, operation = ?row.pending_operation, "write queued offline");
            DocumentWrapper::from_local(&row)
        })
        .await
    }

    /// Delete a document, or queue the deletion while offline.
    pub async fn delete(
        &self,
        document_id: &str,
        partition: &str,
        options: Option<WriteOptions>,
    ) -> Result<DocumentWrapper<()>, SonarError> {
        self.check(partition, Some(document_id))?;
        let ttl = self.ttl(options.map(|o| o.ttl));
        self.cancellable(async {
            let cached = self.lookup(partition, document_id, None).await;
            let needs_remote = match &cached {
                Ok((_, _, Ok(row))) => row.etag.is_some(),
                _ => true,
            };
            if needs_remote && self.is_online() {
                let token = self.inner.tokens.resolve(partition).await?;
                self.inner.remote.delete(&token, document_id).await?;
                let table = table_for_token(&token)?;
                if let Err(e) = self
                    .inner
                    .cache
                    .delete_online(&table, &token.partition, document_id)
                    .await
                {
                    warn!(id = document_id, error = %e, "failed to remove deleted document from cache");
                }
                return Ok(DocumentWrapper {
                    document: None,
                    partition: token.partition,
                    id: document_id.to_string(),
                    etag: None,
                    last_updated_secs: now_ms() / 1000,
                    from_device_cache: false,
                    pending_operation: None,
                });
            }

            let (token, table, row) = cached?;
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    self.inner
                        .cache
                        .delete_online(&table, &token.partition, document_id)
                        .await?;
                    return Err(e);
                }
            };
            let pending_operation = if row.etag.is_some() {
                let written = self
                    .inner
                    .cache
                    .delete_offline(&table, &token.partition, document_id, ttl)
                    .await?;
                if !written {
                    return Err(SonarError::Internal("failed to write to cache".into()));
                }
                Some(PendingOperation::Delete)
            } else {
                self.inner
                    .cache
                    .delete_online(&table, &token.partition, document_id)
                    .await?;
                None
            };
            debug!(id = document_id, queued = pending_operation.is_some(), "document deleted offline");
            Ok(DocumentWrapper {
                document: None,
                partition: row.partition,
                id: row.document_id,
                etag: row.etag,
                last_updated_secs: now_ms() / 1000,
                from_device_cache: true,
                pending_operation,
            })
        })
        .await
    }

    /// Disable the store and stop its background tasks.
    pub async fn shutdown(&self) {
        self.set_enabled(false).await;
    }
}

fn no_partition(partition: &str) -> SonarError {
    SonarError::NotFound(format!("unable to find partition named {partition}"))
}
