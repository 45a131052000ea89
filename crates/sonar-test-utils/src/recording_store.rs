// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A log store wrapper that records every call the channel makes.
//!
//! Counts can be held after they read the store, so a test can change the
//! group registry while a stale count is still on its way to the worker.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use sonar_core::{
    AdapterType, HealthStatus, Log, LogBatch, LogStore, PluginAdapter, SonarError,
};

/// One call made against the wrapped store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Put(String),
    /// Group and the count that was read.
    Count(String, usize),
    GetLogs { group: String, limit: usize },
    DeleteBatch { group: String, batch_id: String },
    ReleaseBatch { group: String, batch_id: String },
    DeleteGroup(String),
    ClearPendingState,
}

pub struct RecordingLogStore {
    inner: Arc<dyn LogStore>,
    calls: Mutex<Vec<StoreCall>>,
    counts_held: watch::Sender<bool>,
}

impl RecordingLogStore {
    pub fn new(inner: Arc<dyn LogStore>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
            counts_held: watch::Sender::new(false),
        }
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of `get_logs` calls for `group`.
    pub fn get_logs_calls(&self, group: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, StoreCall::GetLogs { group: g, .. } if g == group))
            .count()
    }

    /// Number of `delete_batch` calls, across groups.
    pub fn delete_batch_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, StoreCall::DeleteBatch { .. }))
            .count()
    }

    /// Number of counts that have read the store for `group`.
    pub fn count_calls(&self, group: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, StoreCall::Count(g, _) if g == group))
            .count()
    }

    /// Park every following count after it has read the store.
    pub fn hold_counts(&self) {
        self.counts_held.send_replace(true);
    }

    pub fn release_counts(&self) {
        self.counts_held.send_replace(false);
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PluginAdapter for RecordingLogStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> semver::Version {
        self.inner.version()
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::LogStore
    }

    async fn health_check(&self) -> Result<HealthStatus, SonarError> {
        self.inner.health_check().await
    }

    async fn shutdown(&self) -> Result<(), SonarError> {
        self.inner.shutdown().await
    }
}

#[async_trait]
impl LogStore for RecordingLogStore {
    async fn put(&self, group: &str, log: &Log) -> Result<i64, SonarError> {
        self.record(StoreCall::Put(group.to_string()));
        self.inner.put(group, log).await
    }

    async fn count(&self, group: &str) -> Result<usize, SonarError> {
        let count = self.inner.count(group).await?;
        self.record(StoreCall::Count(group.to_string(), count));
        let mut held = self.counts_held.subscribe();
        let _ = held.wait_for(|held| !held).await;
        Ok(count)
    }

    async fn get_logs(&self, group: &str, limit: usize) -> Result<Option<LogBatch>, SonarError> {
        self.record(StoreCall::GetLogs {
            group: group.to_string(),
            limit,
        });
        self.inner.get_logs(group, limit).await
    }

    async fn delete_batch(&self, group: &str, batch_id: &str) -> Result<(), SonarError> {
        self.record(StoreCall::DeleteBatch {
            group: group.to_string(),
            batch_id: batch_id.to_string(),
        });
        self.inner.delete_batch(group, batch_id).await
    }

    async fn release_batch(&self, group: &str, batch_id: &str) -> Result<(), SonarError> {
        self.record(StoreCall::ReleaseBatch {
            group: group.to_string(),
            batch_id: batch_id.to_string(),
        });
        self.inner.release_batch(group, batch_id).await
    }

    async fn delete_group(&self, group: &str) -> Result<usize, SonarError> {
        self.record(StoreCall::DeleteGroup(group.to_string()));
        self.inner.delete_group(group).await
    }

    async fn clear_pending_state(&self) -> Result<(), SonarError> {
        self.record(StoreCall::ClearPendingState);
        self.inner.clear_pending_state().await
    }
}
