// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harnesses for end-to-end channel and document tests.
//!
//! `TestHarness` assembles a running channel over a mock transport and
//! device, backed by a temp SQLite log store or the in-memory one.
//! `DataHarness` does the same for the document store.

use std::sync::Arc;

use uuid::Uuid;

use sonar_channel::{Channel, ChannelDeps, ChannelSettings};
use sonar_core::{LogStore, SonarError};
use sonar_data::{DataDeps, DataSettings, DataStore, TimeToLive};
use sonar_storage::{Database, DocumentCache, MemoryLogStore, Schema, SqliteLogStore};

use crate::mock_device::MockDevice;
use crate::mock_ingestion::{MockIngestion, SendOutcome};
use crate::mock_network::MockNetwork;
use crate::mock_remote::{MockDocumentRemote, MockTokenExchange};
use crate::recording_store::RecordingLogStore;

/// App secret the harnesses start with.
pub const TEST_APP_SECRET: &str = "00000000-test-app-secret";

/// Builder for a channel test environment.
pub struct TestHarnessBuilder {
    sqlite: bool,
    app_secret: Option<String>,
    enabled: bool,
    clear_batch_size: usize,
    outcomes: Vec<SendOutcome>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            sqlite: false,
            app_secret: Some(TEST_APP_SECRET.to_string()),
            enabled: true,
            clear_batch_size: 100,
            outcomes: Vec::new(),
        }
    }

    /// Persist logs in a temp SQLite database instead of memory.
    pub fn with_sqlite(mut self) -> Self {
        self.sqlite = true;
        self
    }

    /// Start without an app secret, holding every send.
    pub fn without_app_secret(mut self) -> Self {
        self.app_secret = None;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_clear_batch_size(mut self, size: usize) -> Self {
        self.clear_batch_size = size;
        self
    }

    /// Script the transport's answers.
    pub fn with_outcomes(mut self, outcomes: Vec<SendOutcome>) -> Self {
        self.outcomes = outcomes;
        self
    }

    pub async fn build(self) -> Result<TestHarness, SonarError> {
        let (inner, temp_dir): (Arc<dyn LogStore>, _) = if self.sqlite {
            let temp_dir =
                tempfile::TempDir::new().map_err(|e| SonarError::Storage { source: e.into() })?;
            let path = temp_dir.path().join("logs.db");
            let db = Database::open(&path.to_string_lossy(), true, Schema::Logs).await?;
            (Arc::new(SqliteLogStore::new(db)), Some(temp_dir))
        } else {
            (Arc::new(MemoryLogStore::new(10_000)), None)
        };
        let calls = Arc::new(RecordingLogStore::new(inner));
        let store: Arc<dyn LogStore> = calls.clone();

        let ingestion = Arc::new(MockIngestion::with_outcomes(self.outcomes));
        let device = Arc::new(MockDevice::new());
        let mut settings = ChannelSettings::new(Uuid::new_v4());
        settings.app_secret = self.app_secret;
        settings.enabled = self.enabled;
        settings.clear_batch_size = self.clear_batch_size;

        let channel = Channel::start(
            ChannelDeps {
                store: store.clone(),
                ingestion: ingestion.clone(),
                device: device.clone(),
            },
            settings,
        );

        Ok(TestHarness {
            channel,
            store,
            store_calls: calls,
            ingestion,
            device,
            _temp_dir: temp_dir,
        })
    }
}

/// A running channel with mock collaborators.
pub struct TestHarness {
    pub channel: Channel,
    /// The log store behind the channel, for persistence assertions.
    pub store: Arc<dyn LogStore>,
    /// The same store, seen through its call recorder.
    pub store_calls: Arc<RecordingLogStore>,
    pub ingestion: Arc<MockIngestion>,
    pub device: Arc<MockDevice>,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: Option<tempfile::TempDir>,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Logs of `group` persisted and not part of an in-flight batch.
    pub async fn persisted(&self, group: &str) -> Result<usize, SonarError> {
        self.store.count(group).await
    }
}

/// Builder for a document store test environment.
pub struct DataHarnessBuilder {
    connected: bool,
    app_secret: Option<String>,
    enabled: bool,
    default_ttl: TimeToLive,
}

impl DataHarnessBuilder {
    fn new() -> Self {
        Self {
            connected: true,
            app_secret: Some(TEST_APP_SECRET.to_string()),
            enabled: true,
            default_ttl: TimeToLive::DEFAULT,
        }
    }

    pub fn offline(mut self) -> Self {
        self.connected = false;
        self
    }

    pub fn without_app_secret(mut self) -> Self {
        self.app_secret = None;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_default_ttl(mut self, ttl: TimeToLive) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub async fn build(self) -> Result<DataHarness, SonarError> {
        let cache = DocumentCache::open_in_memory().await?;
        let remote = Arc::new(MockDocumentRemote::new());
        let exchange = Arc::new(MockTokenExchange::new());
        let network = Arc::new(MockNetwork::new(self.connected));
        let store = DataStore::start(
            DataDeps {
                cache: cache.clone(),
                remote: remote.clone(),
                exchange: exchange.clone(),
                network: network.clone(),
            },
            DataSettings {
                app_secret: self.app_secret,
                enabled: self.enabled,
                default_ttl: self.default_ttl,
            },
        )
        .await;
        Ok(DataHarness {
            store,
            cache,
            remote,
            exchange,
            network,
        })
    }
}

/// A running document store over an in-memory cache and service.
pub struct DataHarness {
    pub store: DataStore,
    /// The cache behind the store, for row-level assertions.
    pub cache: DocumentCache,
    pub remote: Arc<MockDocumentRemote>,
    pub exchange: Arc<MockTokenExchange>,
    pub network: Arc<MockNetwork>,
}

impl DataHarness {
    pub fn builder() -> DataHarnessBuilder {
        DataHarnessBuilder::new()
    }

    /// Sign `account_id` in on both the store and the token exchange.
    pub async fn sign_in(&self, account_id: &str) -> Result<(), SonarError> {
        self.exchange.set_account(Some(account_id));
        self.store.set_account(Some(account_id)).await
    }
}
