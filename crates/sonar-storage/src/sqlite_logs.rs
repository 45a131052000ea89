// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed [`LogStore`].
//!
//! The database can be capped with [`SqliteLogStore::set_max_storage_size`].
//! When an insert hits the cap, the oldest logs of the lowest priority (never
//! above the new log's) are evicted until it fits.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rusqlite::{params, ErrorCode, OptionalExtension};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use sonar_core::{
    AdapterType, HealthStatus, Log, LogBatch, LogStore, PluginAdapter, Priority, SonarError,
};

use crate::database::{map_tr_err, Database};
use crate::pending::PendingBatches;

/// Durable log store. Logs are kept as JSON rows in insertion order.
pub struct SqliteLogStore {
    db: Database,
    pending: Mutex<PendingBatches>,
    /// Cap applied to the database file; `0` when uncapped.
    max_bytes: AtomicU64,
}

impl SqliteLogStore {
    /// Wrap an already migrated log database.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            pending: Mutex::new(PendingBatches::default()),
            max_bytes: AtomicU64::new(0),
        }
    }

    /// Cap the database file at `max_bytes`, rounded up to whole pages.
    ///
    /// Returns the effective cap. Fails when the database already holds more
    /// than the requested size; SQLite then keeps its current size as the cap.
    pub async fn set_max_storage_size(&self, max_bytes: u64) -> Result<u64, SonarError> {
        let (page_size, requested, applied) = self
            .db
            .connection()
            .call(move |conn| {
                let page_size: i64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;
                let requested = max_bytes.div_ceil(page_size.max(1) as u64) as i64;
                let applied: i64 =
                    conn.pragma_update_and_check(None, "max_page_count", requested, |row| {
                        row.get(0)
                    })?;
                Ok((page_size, requested, applied))
            })
            .await
            .map_err(map_tr_err)?;

        let effective = (applied * page_size) as u64;
        self.max_bytes.store(effective, Ordering::Release);
        if applied != requested {
            return Err(SonarError::Config(format!(
                "cannot cap the log database at {max_bytes} bytes, it already uses {effective} bytes"
            )));
        }
        info!(max_bytes = effective, "log database size capped");
        Ok(effective)
    }

    /// The effective cap, if one was set.
    pub fn max_storage_size(&self) -> Option<u64> {
        match self.max_bytes.load(Ordering::Acquire) {
            0 => None,
            max => Some(max),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn total(&self, group: &str) -> Result<usize, SonarError> {
        let group = group.to_string();
        self.db
            .connection()
            .call(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM logs WHERE persistence_group = ?1",
                    params![group],
                    |row| row.get(0),
                )?;
                Ok(n as usize)
            })
            .await
            .map_err(map_tr_err)
    }
}

#[async_trait]
impl PluginAdapter for SqliteLogStore {
    fn name(&self) -> &str {
        "sqlite-logs"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::LogStore
    }

    async fn health_check(&self) -> Result<HealthStatus, SonarError> {
        self.db.ping().await?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), SonarError> {
        self.db.checkpoint().await
    }
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn put(&self, group: &str, log: &Log) -> Result<i64, SonarError> {
        let payload =
            serde_json::to_string(log).map_err(|e| SonarError::serialization("log", e))?;
        if let Some(max) = self.max_storage_size()
            && payload.len() as u64 >= max
        {
            return Err(SonarError::Storage {
                source: format!(
                    "log of {} bytes does not fit in a {max} byte database",
                    payload.len()
                )
                .into(),
            });
        }

        // Evicted rows may belong to an in-flight batch.
        let mut pending = self.pending.lock().await;
        let group_key = group.to_string();
        let priority = log.priority.as_i64();
        let (id, evicted) = self
            .db
            .connection()
            .call(move |conn| {
                let mut evicted: Vec<(i64, String)> = Vec::new();
                loop {
                    let inserted = conn.execute(
                        "INSERT INTO logs (persistence_group, log, priority) VALUES (?1, ?2, ?3)",
                        params![group_key, payload, priority],
                    );
                    match inserted {
                        Ok(_) => return Ok((conn.last_insert_rowid(), evicted)),
                        Err(e) if e.sqlite_error_code() == Some(ErrorCode::DiskFull) => {
                            let oldest = conn
                                .query_row(
                                    "SELECT id, persistence_group FROM logs \
                                     WHERE priority <= ?1 ORDER BY priority, id LIMIT 1",
                                    params![priority],
                                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                                )
                                .optional()?;
                            let Some((id, group)) = oldest else {
                                return Err(e);
                            };
                            conn.execute("DELETE FROM logs WHERE id = ?1", params![id])?;
                            evicted.push((id, group));
                        }
                        Err(e) => return Err(e),
                    }
                }
            })
            .await
            .map_err(map_tr_err)?;

        if !evicted.is_empty() {
            for (id, evicted_group) in &evicted {
                pending.forget_id(evicted_group, *id);
            }
            warn!(group, evicted = evicted.len(), "log database full, evicted oldest logs");
        }
        Ok(id)
    }

    async fn count(&self, group: &str) -> Result<usize, SonarError> {
        let pending = self.pending.lock().await;
        let total = self.total(group).await?;
        Ok(total.saturating_sub(pending.count(group)))
    }

    async fn get_logs(&self, group: &str, limit: usize) -> Result<Option<LogBatch>, SonarError> {
        if limit == 0 {
            return Ok(None);
        }

        // Held across the query so two fetches never hand out the same rows.
        let mut pending = self.pending.lock().await;
        let skip = pending.ids(group);
        let group_key = group.to_string();

        let (rows, corrupted) = self
            .db
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, log, priority FROM logs WHERE persistence_group = ?1 \
                     ORDER BY priority DESC, id ASC",
                )?;
                let mut cursor = stmt.query(params![group_key])?;
                let mut rows = Vec::new();
                let mut corrupted = Vec::new();
                while rows.len() < limit
                    && let Some(row) = cursor.next()?
                {
                    let id: i64 = row.get(0)?;
                    if skip.contains(&id) {
                        continue;
                    }
                    let payload: String = row.get(1)?;
                    match serde_json::from_str::<Log>(&payload) {
                        Ok(mut log) => {
                            log.priority = Priority::from_i64(row.get(2)?);
                            rows.push((id, log));
                        }
                        Err(_) => corrupted.push(id),
                    }
                }
                drop(cursor);
                drop(stmt);
                for id in &corrupted {
                    conn.execute("DELETE FROM logs WHERE id = ?1", params![id])?;
                }
                Ok((rows, corrupted))
            })
            .await
            .map_err(map_tr_err)?;

        if !corrupted.is_empty() {
            warn!(group, count = corrupted.len(), "deleted corrupted log rows");
        }
        if rows.is_empty() {
            return Ok(None);
        }

        let (ids, logs): (Vec<i64>, Vec<Log>) = rows.into_iter().unzip();
        let batch_id = pending.mark(group, ids);
        debug!(group, batch_id = %batch_id, count = logs.len(), "logs marked pending");
        Ok(Some(LogBatch { batch_id, logs }))
    }

    async fn delete_batch(&self, group: &str, batch_id: &str) -> Result<(), SonarError> {
        let Some(ids) = self.pending.lock().await.take(group, batch_id) else {
            debug!(group, batch_id, "delete of unknown batch ignored");
            return Ok(());
        };
        self.db
            .connection()
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare("DELETE FROM logs WHERE id = ?1")?;
                    for id in &ids {
                        stmt.execute(params![id])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    async fn release_batch(&self, group: &str, batch_id: &str) -> Result<(), SonarError> {
        self.pending.lock().await.take(group, batch_id);
        Ok(())
    }

    async fn delete_group(&self, group: &str) -> Result<usize, SonarError> {
        let mut pending = self.pending.lock().await;
        let group_key = group.to_string();
        let deleted = self
            .db
            .connection()
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM logs WHERE persistence_group = ?1",
                    params![group_key],
                )?;
                Ok(n)
            })
            .await
            .map_err(map_tr_err)?;
        pending.forget_group(group);
        debug!(group, deleted, "group logs deleted");
        Ok(deleted)
    }

    async fn clear_pending_state(&self) -> Result<(), SonarError> {
        self.pending.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::Schema;
    use tracing_test::traced_test;

    async fn store() -> SqliteLogStore {
        SqliteLogStore::new(Database::open_in_memory(Schema::Logs).await.unwrap())
    }

    fn log(n: usize) -> Log {
        Log::new("event").with_property("n", n)
    }

    #[tokio::test]
    async fn put_then_count_per_group() {
        let store = store().await;
        for i in 0..3 {
            store.put("analytics", &log(i)).await.unwrap();
        }
        store.put("crashes", &log(9)).await.unwrap();
        assert_eq!(store.count("analytics").await.unwrap(), 3);
        assert_eq!(store.count("crashes").await.unwrap(), 1);
        assert_eq!(store.count("unknown").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn get_logs_returns_oldest_and_marks_pending() {
        let store = store().await;
        for i in 0..5 {
            store.put("analytics", &log(i)).await.unwrap();
        }

        let first = store.get_logs("analytics", 3).await.unwrap().unwrap();
        let ns: Vec<_> = first.logs.iter().map(|l| l.properties["n"].as_u64().unwrap()).collect();
        assert_eq!(ns, vec![0, 1, 2]);
        assert_eq!(store.count("analytics").await.unwrap(), 2);

        let second = store.get_logs("analytics", 3).await.unwrap().unwrap();
        assert_eq!(second.logs.len(), 2);
        assert_ne!(first.batch_id, second.batch_id);
        assert!(store.get_logs("analytics", 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_batch_removes_only_that_batch() {
        let store = store().await;
        for i in 0..4 {
            store.put("analytics", &log(i)).await.unwrap();
        }
        let batch = store.get_logs("analytics", 2).await.unwrap().unwrap();
        store.delete_batch("analytics", &batch.batch_id).await.unwrap();
        assert_eq!(store.count("analytics").await.unwrap(), 2);

        store.clear_pending_state().await.unwrap();
        let rest = store.get_logs("analytics", 10).await.unwrap().unwrap();
        assert_eq!(rest.logs[0].properties["n"], 2);
    }

    #[tokio::test]
    async fn clear_pending_state_makes_logs_fetchable_again() {
        let store = store().await;
        store.put("analytics", &log(0)).await.unwrap();
        let batch = store.get_logs("analytics", 10).await.unwrap().unwrap();
        assert_eq!(store.count("analytics").await.unwrap(), 0);

        store.clear_pending_state().await.unwrap();
        assert_eq!(store.count("analytics").await.unwrap(), 1);
        let again = store.get_logs("analytics", 10).await.unwrap().unwrap();
        assert_eq!(again.logs, batch.logs);
    }

    #[tokio::test]
    async fn release_batch_keeps_logs() {
        let store = store().await;
        store.put("analytics", &log(0)).await.unwrap();
        let batch = store.get_logs("analytics", 10).await.unwrap().unwrap();
        store.release_batch("analytics", &batch.batch_id).await.unwrap();
        assert_eq!(store.count("analytics").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_group_drops_rows_and_markers() {
        let store = store().await;
        for i in 0..3 {
            store.put("analytics", &log(i)).await.unwrap();
        }
        store.get_logs("analytics", 1).await.unwrap();
        assert_eq!(store.delete_group("analytics").await.unwrap(), 3);
        assert_eq!(store.count("analytics").await.unwrap(), 0);
        assert!(store.get_logs("analytics", 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupted_rows_are_deleted_and_skipped() {
        let store = store().await;
        store.put("analytics", &log(0)).await.unwrap();
        store
            .database()
            .connection()
            .call(|conn| {
                conn.execute(
                    "INSERT INTO logs (persistence_group, log) VALUES ('analytics', '{not json')",
                    [],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
            .unwrap();
        store.put("analytics", &log(1)).await.unwrap();

        let batch = store.get_logs("analytics", 10).await.unwrap().unwrap();
        assert_eq!(batch.logs.len(), 2);
        store.delete_batch("analytics", &batch.batch_id).await.unwrap();
        assert_eq!(store.count("analytics").await.unwrap(), 0);
    }

    fn padded(n: usize) -> Log {
        log(n).with_property("pad", "x".repeat(1000))
    }

    /// Store over a fresh file with room for `extra_pages` beyond the schema.
    async fn capped_store(dir: &tempfile::TempDir, extra_pages: u64) -> SqliteLogStore {
        let path = dir.path().join("logs.db");
        let db = Database::open(path.to_str().unwrap(), false, Schema::Logs)
            .await
            .unwrap();
        let store = SqliteLogStore::new(db);
        let (pages, page_size) = store
            .database()
            .connection()
            .call(|conn| {
                let pages: i64 = conn.pragma_query_value(None, "page_count", |row| row.get(0))?;
                let size: i64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;
                Ok((pages as u64, size as u64))
            })
            .await
            .map_err(map_tr_err)
            .unwrap();
        let cap = (pages + extra_pages) * page_size;
        assert_eq!(store.set_max_storage_size(cap).await.unwrap(), cap);
        store
    }

    fn numbers(batch: &LogBatch) -> Vec<u64> {
        batch
            .logs
            .iter()
            .map(|l| l.properties["n"].as_u64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn critical_logs_are_fetched_first() {
        let store = store().await;
        store.put("analytics", &log(0)).await.unwrap();
        store
            .put("analytics", &log(1).with_priority(Priority::Critical))
            .await
            .unwrap();
        store.put("analytics", &log(2)).await.unwrap();

        let batch = store.get_logs("analytics", 10).await.unwrap().unwrap();
        assert_eq!(numbers(&batch), vec![1, 0, 2]);
        assert_eq!(batch.logs[0].priority, Priority::Critical);
        assert_eq!(batch.logs[1].priority, Priority::Normal);
    }

    #[tokio::test]
    #[traced_test]
    async fn full_database_evicts_oldest_logs() {
        let dir = tempfile::tempdir().unwrap();
        let store = capped_store(&dir, 8).await;

        for i in 0..100 {
            store.put("analytics", &padded(i)).await.unwrap();
        }

        let kept = store.count("analytics").await.unwrap();
        assert!(kept > 0 && kept < 100, "kept {kept}");
        let batch = store.get_logs("analytics", 100).await.unwrap().unwrap();
        let expected: Vec<u64> = (100 - kept as u64..100).collect();
        assert_eq!(numbers(&batch), expected);
        assert!(logs_contain("evicted oldest logs"));
    }

    #[tokio::test]
    async fn critical_logs_outlive_normal_ones() {
        let dir = tempfile::tempdir().unwrap();
        let store = capped_store(&dir, 8).await;

        for i in 0..2 {
            store
                .put("crashes", &padded(i).with_priority(Priority::Critical))
                .await
                .unwrap();
        }
        for i in 2..100 {
            store.put("analytics", &padded(i)).await.unwrap();
        }

        assert_eq!(store.count("crashes").await.unwrap(), 2);
        assert!(store.count("analytics").await.unwrap() < 98);
    }

    #[tokio::test]
    async fn evicted_pending_rows_leave_counts_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let store = capped_store(&dir, 8).await;
        for i in 0..3 {
            store.put("analytics", &padded(i)).await.unwrap();
        }
        let batch = store.get_logs("analytics", 3).await.unwrap().unwrap();

        for i in 3..100 {
            store.put("analytics", &padded(i)).await.unwrap();
        }
        let total = store.total("analytics").await.unwrap();
        assert_eq!(store.count("analytics").await.unwrap(), total);
        store.delete_batch("analytics", &batch.batch_id).await.unwrap();
        assert_eq!(store.total("analytics").await.unwrap(), total);
    }

    #[tokio::test]
    async fn cap_below_current_size_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.db");
        let db = Database::open(path.to_str().unwrap(), false, Schema::Logs)
            .await
            .unwrap();
        let store = SqliteLogStore::new(db);
        for i in 0..40 {
            store.put("analytics", &padded(i)).await.unwrap();
        }

        assert!(matches!(
            store.set_max_storage_size(4096).await,
            Err(SonarError::Config(_))
        ));
        assert!(store.max_storage_size().unwrap() > 4096);
        store.put("analytics", &log(40)).await.unwrap();
    }

    #[tokio::test]
    async fn log_larger_than_cap_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = capped_store(&dir, 1).await;
        let huge = log(0).with_property("pad", "x".repeat(64 * 1024));

        assert!(store.put("analytics", &huge).await.is_err());
        assert_eq!(store.count("analytics").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn logs_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.db");
        let path = path.to_str().unwrap();
        {
            let store = SqliteLogStore::new(Database::open(path, true, Schema::Logs).await.unwrap());
            store.put("analytics", &log(7)).await.unwrap();
            store.shutdown().await.unwrap();
        }
        let store = SqliteLogStore::new(Database::open(path, true, Schema::Logs).await.unwrap());
        assert_eq!(store.count("analytics").await.unwrap(), 1);
        assert_eq!(store.health_check().await.unwrap(), HealthStatus::Healthy);
    }
}
