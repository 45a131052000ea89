// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent log store consumed by the channel.

use async_trait::async_trait;

use crate::error::SonarError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{Log, LogBatch};

/// Append-only row store of logs partitioned by group name.
///
/// Pending markers are kept in memory by the store: a log handed out by
/// [`get_logs`](LogStore::get_logs) is not handed out again until its batch is
/// deleted, released, or [`clear_pending_state`](LogStore::clear_pending_state)
/// runs.
#[async_trait]
pub trait LogStore: PluginAdapter {
    /// Persist a log for `group` with its priority. Returns the row identifier.
    ///
    /// A bounded store makes room by evicting its oldest logs whose priority
    /// does not exceed the new log's, and fails when none qualify.
    async fn put(&self, group: &str, log: &Log) -> Result<i64, SonarError>;

    /// Number of persisted logs for `group` that are not marked pending.
    async fn count(&self, group: &str) -> Result<usize, SonarError>;

    /// Fetch up to `limit` non-pending logs and mark them pending.
    ///
    /// Critical logs come first, then insertion order. Each log carries the
    /// priority it was stored with.
    ///
    /// Returns `None` when the group has nothing available.
    async fn get_logs(&self, group: &str, limit: usize) -> Result<Option<LogBatch>, SonarError>;

    /// Delete the logs of a batch and forget its marker.
    async fn delete_batch(&self, group: &str, batch_id: &str) -> Result<(), SonarError>;

    /// Forget a batch marker without deleting its logs.
    async fn release_batch(&self, group: &str, batch_id: &str) -> Result<(), SonarError>;

    /// Delete every log of `group`. Returns how many rows were removed.
    async fn delete_group(&self, group: &str) -> Result<usize, SonarError>;

    /// Forget every pending marker. Logs stay persisted.
    async fn clear_pending_state(&self) -> Result<(), SonarError>;
}
