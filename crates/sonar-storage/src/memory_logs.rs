// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded in-memory [`LogStore`] used when SQLite cannot be opened.
//!
//! Logs held here are lost when the process exits.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use sonar_core::{
    AdapterType, HealthStatus, Log, LogBatch, LogStore, PluginAdapter, Priority, SonarError,
};

use crate::pending::PendingBatches;

struct Row {
    group: String,
    payload: String,
    priority: Priority,
}

#[derive(Default)]
struct State {
    next_id: i64,
    /// Ordered by insertion.
    rows: BTreeMap<i64, Row>,
    pending: PendingBatches,
}

/// Capacity-capped log store. When full, the oldest log of any group whose
/// priority does not exceed the new one is evicted.
pub struct MemoryLogStore {
    capacity: usize,
    state: Mutex<State>,
}

impl MemoryLogStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(State::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[async_trait]
impl PluginAdapter for MemoryLogStore {
    fn name(&self) -> &str {
        "memory-logs"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::LogStore
    }

    async fn health_check(&self) -> Result<HealthStatus, SonarError> {
        Ok(HealthStatus::Degraded(
            "logs are kept in memory only".to_string(),
        ))
    }

    async fn shutdown(&self) -> Result<(), SonarError> {
        let state = self.state.lock().await;
        if !state.rows.is_empty() {
            warn!(count = state.rows.len(), "in-memory logs will be lost at exit");
        }
        Ok(())
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn put(&self, group: &str, log: &Log) -> Result<i64, SonarError> {
        let payload =
            serde_json::to_string(log).map_err(|e| SonarError::serialization("log", e))?;
        let mut state = self.state.lock().await;

        while state.rows.len() >= self.capacity {
            let victim = state
                .rows
                .iter()
                .filter(|(_, row)| row.priority <= log.priority)
                .min_by_key(|(id, row)| (row.priority, **id))
                .map(|(id, _)| *id);
            let Some(evicted) = victim.and_then(|id| state.rows.remove(&id).map(|row| (id, row)))
            else {
                return Err(SonarError::Storage {
                    source: "in-memory log store is full of higher priority logs".into(),
                });
            };
            state.pending.forget_id(&evicted.1.group, evicted.0);
            warn!(
                group = %evicted.1.group,
                capacity = self.capacity,
                "in-memory log store full, evicted oldest log"
            );
        }

        state.next_id += 1;
        let id = state.next_id;
        state.rows.insert(
            id,
            Row {
                group: group.to_string(),
                payload,
                priority: log.priority,
            },
        );
        Ok(id)
    }

    async fn count(&self, group: &str) -> Result<usize, SonarError> {
        let state = self.state.lock().await;
        let total = state.rows.values().filter(|row| row.group == group).count();
        Ok(total.saturating_sub(state.pending.count(group)))
    }

    async fn get_logs(&self, group: &str, limit: usize) -> Result<Option<LogBatch>, SonarError> {
        let mut state = self.state.lock().await;
        let skip = state.pending.ids(group);

        let mut candidates: Vec<(&i64, &Row)> = state
            .rows
            .iter()
            .filter(|(id, row)| row.group == group && !skip.contains(*id))
            .collect();
        candidates.sort_by_key(|(id, row)| (Reverse(row.priority), **id));
        let picked: Vec<(i64, Log)> = candidates
            .into_iter()
            .take(limit)
            .filter_map(|(id, row)| {
                serde_json::from_str::<Log>(&row.payload).ok().map(|mut log| {
                    log.priority = row.priority;
                    (*id, log)
                })
            })
            .collect();
        if picked.is_empty() {
            return Ok(None);
        }

        let (ids, logs): (Vec<i64>, Vec<Log>) = picked.into_iter().unzip();
        let batch_id = state.pending.mark(group, ids);
        debug!(group, batch_id = %batch_id, count = logs.len(), "logs marked pending");
        Ok(Some(LogBatch { batch_id, logs }))
    }

    async fn delete_batch(&self, group: &str, batch_id: &str) -> Result<(), SonarError> {
        let mut state = self.state.lock().await;
        if let Some(ids) = state.pending.take(group, batch_id) {
            for id in ids {
                state.rows.remove(&id);
            }
        }
        Ok(())
    }

    async fn release_batch(&self, group: &str, batch_id: &str) -> Result<(), SonarError> {
        self.state.lock().await.pending.take(group, batch_id);
        Ok(())
    }

    async fn delete_group(&self, group: &str) -> Result<usize, SonarError> {
        let mut state = self.state.lock().await;
        let before = state.rows.len();
        state.rows.retain(|_, row| row.group != group);
        state.pending.forget_group(group);
        Ok(before - state.rows.len())
    }

    async fn clear_pending_state(&self) -> Result<(), SonarError> {
        self.state.lock().await.pending.clear();
        Ok(())
    }
}
