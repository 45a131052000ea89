// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Offline-first document storage for the Sonar SDK.
//!
//! Documents live in two partitions: `readonly`, shared by every user of the
//! application, and `user`, private to the signed-in account. Reads and
//! writes go to the remote document service while online and are cached on
//! device; offline writes are recorded as pending operations on the cached
//! rows and replayed by the [`SyncReconciler`] once connectivity returns.

pub mod data;
pub mod document;
pub mod http;
pub mod partition;
pub mod reconciler;
pub mod token_manager;

use std::sync::Arc;

use sonar_config::SonarConfig;
use sonar_core::{NetworkStateProvider, SonarError};
use sonar_storage::DocumentCache;
use tracing::info;

pub use data::{DataDeps, DataSettings, DataStore};
pub use document::{
    DocumentMetadata, DocumentWrapper, PaginatedDocuments, ReadOptions, WriteOptions,
};
pub use http::{HttpDocumentClient, HttpTokenExchange};
pub use reconciler::{RemoteOperationListener, SyncReconciler};
pub use sonar_storage::{PendingOperation, TimeToLive};
pub use token_manager::TokenManager;

/// Open the configured document cache and start a [`DataStore`] talking to
/// the remote services over HTTPS.
pub async fn open_data_store(
    config: &SonarConfig,
    network: Arc<dyn NetworkStateProvider>,
) -> Result<DataStore, SonarError> {
    let cache = DocumentCache::open(&config.data.database_path, config.storage.wal_mode).await?;
    if cache.is_in_memory() {
        info!("document cache running in memory, offline writes will not survive restarts");
    }
    let client = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(config.ingestion.connect_timeout_secs))
        .read_timeout(std::time::Duration::from_secs(config.ingestion.read_timeout_secs))
        .build()
        .map_err(|e| SonarError::Network {
            message: format!("failed to build HTTP client: {e}"),
            source: Some(Box::new(e)),
        })?;
    let exchange = HttpTokenExchange::new(
        client.clone(),
        &config.data.token_exchange_url,
        config.sdk.app_secret.as_deref().unwrap_or_default(),
    );
    let deps = DataDeps {
        cache,
        remote: Arc::new(HttpDocumentClient::new(client)),
        exchange: Arc::new(exchange),
        network,
    };
    Ok(DataStore::start(deps, DataSettings::from_config(config)).await)
}
