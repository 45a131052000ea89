// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for the Sonar telemetry SDK.
//!
//! Provides the durable log store and its bounded in-memory fallback, the
//! offline document cache with its pending-operation queue, and the token
//! cache. All database work runs on tokio-rusqlite's single background thread
//! per database file.

pub mod database;
pub mod documents;
pub mod memory_logs;
pub mod migrations;
pub mod models;
mod pending;
pub mod sqlite_logs;
pub mod tokens;

use std::sync::Arc;

use sonar_config::StorageConfig;
use sonar_core::LogStore;
use tracing::{info, warn};

pub use database::Database;
pub use documents::{user_table_name, DocumentCache, READONLY_TABLE};
pub use memory_logs::MemoryLogStore;
pub use migrations::Schema;
pub use models::*;
pub use sqlite_logs::SqliteLogStore;
pub use tokens::TokenCache;

/// Open the configured log store.
///
/// Tries the SQLite database first; when it cannot be opened or migrated the
/// bounded [`MemoryLogStore`] is used instead and the SDK keeps running with
/// reduced durability. A cap the database already exceeds is logged and the
/// current size is kept as the cap.
pub async fn open_log_store(config: &StorageConfig) -> Arc<dyn LogStore> {
    match Database::open(&config.database_path, config.wal_mode, Schema::Logs).await {
        Ok(db) => {
            info!(path = %config.database_path, "log store opened");
            let store = SqliteLogStore::new(db);
            if let Err(e) = store.set_max_storage_size(config.max_storage_bytes).await {
                warn!(error = %e, "log database size cap not applied");
            }
            Arc::new(store)
        }
        Err(e) => {
            warn!(
                path = %config.database_path,
                error = %e,
                capacity = config.memory_fallback_capacity,
                "log database unavailable, falling back to in-memory store"
            );
            Arc::new(MemoryLogStore::new(config.memory_fallback_capacity))
        }
    }
}
