// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Sonar telemetry SDK.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so a misspelled key fails
//! at startup with a suggestion instead of being silently ignored.

use serde::{Deserialize, Serialize};

/// Top-level Sonar configuration.
///
/// Every section is optional and falls back to its compiled defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SonarConfig {
    /// Application identity and global switches.
    #[serde(default)]
    pub sdk: SdkConfig,

    /// Log ingestion endpoint settings.
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Batching engine settings shared by every group.
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Groups registered when the application context starts.
    #[serde(default)]
    pub groups: Vec<GroupSettings>,

    /// Log persistence settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Offline document store settings.
    #[serde(default)]
    pub data: DataConfig,
}

/// Application identity and global switches.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SdkConfig {
    /// App secret sent with every ingestion and token request.
    /// Sending is held until one is known.
    #[serde(default)]
    pub app_secret: Option<String>,

    /// Install identifier (UUID). Generated at startup when absent.
    #[serde(default)]
    pub install_id: Option<String>,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether the channel starts enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            app_secret: None,
            install_id: None,
            log_level: default_log_level(),
            enabled: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Log ingestion endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IngestionConfig {
    /// Base URL; `/logs?api-version=1.0.0` is appended.
    #[serde(default = "default_log_url")]
    pub log_url: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Base delays between attempts of a failed send. Each retry waits half
    /// its interval plus a random share of the other half. Empty disables
    /// transport retries.
    #[serde(default = "default_retry_intervals_ms")]
    pub retry_intervals_ms: Vec<u64>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            log_url: default_log_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            retry_intervals_ms: default_retry_intervals_ms(),
        }
    }
}

fn default_log_url() -> String {
    "https://in.appcenter.ms".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    60
}

fn default_read_timeout_secs() -> u64 {
    20
}

fn default_retry_intervals_ms() -> Vec<u64> {
    vec![10_000, 5 * 60_000, 20 * 60_000]
}

/// Batching engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Chunk size used when a fatal error drains a group's backlog.
    #[serde(default = "default_clear_batch_size")]
    pub clear_batch_size: usize,

    /// Upper bound for `shutdown()` to wait on queued work.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Capacity of the worker command queue.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            clear_batch_size: default_clear_batch_size(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            command_buffer: default_command_buffer(),
        }
    }
}

fn default_clear_batch_size() -> usize {
    100
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_command_buffer() -> usize {
    1024
}

/// One `[[groups]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSettings {
    /// Unique group name, also the persistence key.
    pub name: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,

    #[serde(default = "default_max_parallel_batches")]
    pub max_parallel_batches: usize,
}

impl GroupSettings {
    /// Settings with default thresholds for `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batch_size: default_batch_size(),
            batch_interval_ms: default_batch_interval_ms(),
            max_parallel_batches: default_max_parallel_batches(),
        }
    }
}

fn default_batch_size() -> usize {
    50
}

fn default_batch_interval_ms() -> u64 {
    3000
}

fn default_max_parallel_batches() -> usize {
    3
}

/// Log persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite log database.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// Number of logs the in-memory fallback keeps before evicting the oldest.
    #[serde(default = "default_memory_fallback_capacity")]
    pub memory_fallback_capacity: usize,

    /// Cap on the log database file. Full inserts evict the oldest logs of
    /// the lowest priority.
    #[serde(default = "default_max_storage_bytes")]
    pub max_storage_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: true,
            memory_fallback_capacity: default_memory_fallback_capacity(),
            max_storage_bytes: default_max_storage_bytes(),
        }
    }
}

fn data_file(name: &str) -> String {
    dirs::data_dir()
        .map(|p| p.join("sonar").join(name))
        .unwrap_or_else(|| std::path::PathBuf::from(name))
        .to_string_lossy()
        .into_owned()
}

fn default_database_path() -> String {
    data_file("sonar.db")
}

fn default_memory_fallback_capacity() -> usize {
    300
}

/// Smallest accepted `storage.max_storage_bytes`.
pub const MIN_STORAGE_BYTES: u64 = 24 * 1024;

fn default_max_storage_bytes() -> u64 {
    10 * 1024 * 1024
}

/// Offline document store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base URL of the token exchange service.
    #[serde(default = "default_token_exchange_url")]
    pub token_exchange_url: String,

    /// Default cache lifetime for documents. `0` disables caching, `-1` never expires.
    #[serde(default = "default_document_ttl_secs")]
    pub document_ttl_secs: i64,

    /// Path to the SQLite document cache.
    #[serde(default = "default_documents_path")]
    pub database_path: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token_exchange_url: default_token_exchange_url(),
            document_ttl_secs: default_document_ttl_secs(),
            database_path: default_documents_path(),
        }
    }
}

fn default_token_exchange_url() -> String {
    "https://api.appcenter.ms/v0.1".to_string()
}

fn default_document_ttl_secs() -> i64 {
    86_400
}

fn default_documents_path() -> String {
    data_file("documents.db")
}
