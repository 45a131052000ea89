// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local document cache and pending-operation queue.
//!
//! Each partition maps to a table: the readonly partition lives in
//! `app_documents`, every signed-in user gets `user_<account id>`. A row's
//! `pending_operation` column is the queue; the sync reconciler drains it.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, warn};

use sonar_core::SonarError;

use crate::database::{map_tr_err, Database};
use crate::migrations::Schema;
use crate::models::{
    is_expired_at, now_ms, CachedDocument, LocalDocument, PendingOperation, TimeToLive,
};

/// Table backing the readonly partition.
pub const READONLY_TABLE: &str = "app_documents";

static TABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(app_documents|user_[A-Za-z0-9_]+)$").unwrap());

/// Columns every document table must carry, with the type used when a
/// missing one is added in place.
const COLUMNS: &[(&str, &str)] = &[
    ("partition", "TEXT NOT NULL DEFAULT ''"),
    ("document_id", "TEXT NOT NULL DEFAULT ''"),
    ("document", "TEXT"),
    ("etag", "TEXT"),
    ("expiration_time", "INTEGER NOT NULL DEFAULT 0"),
    ("download_time", "INTEGER NOT NULL DEFAULT 0"),
    ("operation_time", "INTEGER NOT NULL DEFAULT 0"),
    ("pending_operation", "TEXT"),
];

const SELECT_COLUMNS: &str = "partition, document_id, document, etag, expiration_time, \
                              download_time, operation_time, pending_operation";

/// Table name for a signed-in user's partition.
pub fn user_table_name(account_id: &str) -> String {
    format!("user_{}", account_id.replace('-', ""))
}

fn checked_table(table: &str) -> Result<String, SonarError> {
    if TABLE_NAME.is_match(table) {
        Ok(table.to_string())
    } else {
        Err(SonarError::InvalidArgument(format!(
            "invalid document table name `{table}`"
        )))
    }
}

fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            partition TEXT NOT NULL,
            document_id TEXT NOT NULL,
            document TEXT,
            etag TEXT,
            expiration_time INTEGER NOT NULL,
            download_time INTEGER NOT NULL,
            operation_time INTEGER NOT NULL,
            pending_operation TEXT,
            UNIQUE (partition, document_id)
        )"
    )
}

/// Create `table` or bring an older layout up to date.
fn ensure_table(conn: &rusqlite::Connection, table: &str) -> rusqlite::Result<()> {
    let columns: Vec<String> = conn
        .prepare("SELECT name FROM pragma_table_info(?1)")?
        .query_map(params![table], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    if columns.is_empty() {
        return conn.execute_batch(&create_table_sql(table));
    }

    if !has_document_key(conn, table)? {
        warn!(table, "document table lacks its unique key, recreating");
        conn.execute_batch(&format!("DROP TABLE {table}"))?;
        return conn.execute_batch(&create_table_sql(table));
    }

    for (name, decl) in COLUMNS {
        if !columns.iter().any(|c| c == name) {
            debug!(table, column = name, "adding missing column");
            conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {name} {decl}"))?;
        }
    }
    Ok(())
}

/// Whether a unique index over exactly (partition, document_id) exists.
fn has_document_key(conn: &rusqlite::Connection, table: &str) -> rusqlite::Result<bool> {
    let indexes: Vec<String> = conn
        .prepare("SELECT name FROM pragma_index_list(?1) WHERE \"unique\" = 1")?
        .query_map(params![table], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    for index in indexes {
        let mut cols: Vec<String> = conn
            .prepare("SELECT name FROM pragma_index_info(?1)")?
            .query_map(params![index], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        cols.sort();
        if cols == ["document_id", "partition"] {
            return Ok(true);
        }
    }
    Ok(false)
}

fn row_to_document(table: &str, row: &Row<'_>) -> rusqlite::Result<LocalDocument> {
    let pending: Option<String> = row.get(7)?;
    Ok(LocalDocument {
        table: table.to_string(),
        partition: row.get(0)?,
        document_id: row.get(1)?,
        document: row.get(2)?,
        etag: row.get(3)?,
        expiration_time: row.get(4)?,
        download_time: row.get(5)?,
        operation_time: row.get(6)?,
        // Unknown markers are treated as no marker rather than failing the read.
        pending_operation: pending.and_then(|p| PendingOperation::from_str(&p).ok()),
    })
}

fn upsert(conn: &rusqlite::Connection, doc: &LocalDocument) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "INSERT INTO {} ({SELECT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(partition, document_id) DO UPDATE SET
                document = excluded.document,
                etag = excluded.etag,
                expiration_time = excluded.expiration_time,
                download_time = excluded.download_time,
                operation_time = excluded.operation_time,
                pending_operation = excluded.pending_operation",
            doc.table
        ),
        params![
            doc.partition,
            doc.document_id,
            doc.document,
            doc.etag,
            doc.expiration_time,
            doc.download_time,
            doc.operation_time,
            doc.pending_operation.map(|op| op.to_string()),
        ],
    )
}

fn delete_row(
    conn: &rusqlite::Connection,
    table: &str,
    partition: &str,
    document_id: &str,
) -> rusqlite::Result<usize> {
    conn.execute(
        &format!("DELETE FROM {table} WHERE partition = ?1 AND document_id = ?2"),
        params![partition, document_id],
    )
}

/// SQLite-backed document cache.
#[derive(Clone)]
pub struct DocumentCache {
    db: Database,
    in_memory: bool,
}

impl DocumentCache {
    /// Open the cache at `path`, falling back to an in-memory database when
    /// the file cannot be opened or migrated.
    pub async fn open(path: &str, wal_mode: bool) -> Result<Self, SonarError> {
        let (db, in_memory) = match Database::open(path, wal_mode, Schema::Documents).await {
            Ok(db) => (db, false),
            Err(e) => {
                warn!(path, error = %e, "document cache unavailable, using in-memory database");
                (Database::open_in_memory(Schema::Documents).await?, true)
            }
        };
        let cache = Self { db, in_memory };
        cache.ensure(READONLY_TABLE).await?;
        Ok(cache)
    }

    pub async fn open_in_memory() -> Result<Self, SonarError> {
        let cache = Self {
            db: Database::open_in_memory(Schema::Documents).await?,
            in_memory: true,
        };
        cache.ensure(READONLY_TABLE).await?;
        Ok(cache)
    }

    /// Whether the cache is running without durability.
    pub fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn ensure(&self, table: &str) -> Result<(), SonarError> {
        let table = checked_table(table)?;
        self.db
            .connection()
            .call(move |conn| ensure_table(conn, &table))
            .await
            .map_err(map_tr_err)
    }

    /// Create the table for `account_id` if needed and return its name.
    pub async fn create_user_table(&self, account_id: &str) -> Result<String, SonarError> {
        let table = user_table_name(account_id);
        self.ensure(&table).await?;
        Ok(table)
    }

    /// Drop every user table and empty the readonly table.
    pub async fn reset(&self) -> Result<(), SonarError> {
        self.db
            .connection()
            .call(|conn| {
                let tables: Vec<String> = conn
                    .prepare(
                        "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'user!_%' ESCAPE '!'",
                    )?
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<_, _>>()?;
                let tx = conn.transaction()?;
                for table in &tables {
                    tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\""))?;
                }
                tx.execute_batch(&format!("DELETE FROM {READONLY_TABLE}"))?;
                tx.commit()?;
                Ok(tables.len())
            })
            .await
            .map_err(map_tr_err)
            .map(|dropped| debug!(dropped, "document cache reset"))
    }

    async fn write(
        &self,
        table: &str,
        doc: &CachedDocument,
        ttl: TimeToLive,
        op: Option<PendingOperation>,
    ) -> Result<bool, SonarError> {
        if ttl == TimeToLive::NoCache {
            return Ok(false);
        }
        debug!(partition = %doc.partition, id = %doc.document_id, "writing document to cache");
        let row = LocalDocument {
            table: checked_table(table)?,
            partition: doc.partition.clone(),
            document_id: doc.document_id.clone(),
            document: doc.document.clone(),
            etag: doc.etag.clone(),
            expiration_time: ttl.expiration_from(now_ms()),
            download_time: doc.last_updated_ms,
            operation_time: doc.last_updated_ms,
            pending_operation: op,
        };
        self.db
            .connection()
            .call(move |conn| Ok(upsert(conn, &row)? > 0))
            .await
            .map_err(map_tr_err)
    }

    /// Cache a server-confirmed document. Returns `false` when `ttl` disables caching.
    pub async fn write_online(
        &self,
        table: &str,
        doc: &CachedDocument,
        ttl: TimeToLive,
    ) -> Result<bool, SonarError> {
        self.write(table, doc, ttl, None).await
    }

    /// Cache a document with an unsynced operation marker.
    pub async fn write_offline(
        &self,
        table: &str,
        doc: &CachedDocument,
        ttl: TimeToLive,
        op: PendingOperation,
    ) -> Result<bool, SonarError> {
        self.write(table, doc, ttl, Some(op)).await
    }

    /// Record an offline create or replace.
    ///
    /// The marker is CREATE when no live row exists and REPLACE otherwise; the
    /// cached etag is kept so the later sync can be conditional. A cache read
    /// failure is returned without writing.
    pub async fn create_or_update_offline(
        &self,
        table: &str,
        partition: &str,
        document_id: &str,
        document: &str,
        ttl: TimeToLive,
    ) -> Result<LocalDocument, SonarError> {
        let (op, etag) = match self.read(table, partition, document_id, None).await {
            Ok(cached) => (PendingOperation::Replace, cached.etag),
            Err(SonarError::NotFound(_)) => (PendingOperation::Create, None),
            Err(e) => return Err(e),
        };
        let now = now_ms();
        let doc = CachedDocument {
            partition: partition.to_string(),
            document_id: document_id.to_string(),
            document: Some(document.to_string()),
            etag: etag.clone(),
            last_updated_ms: now,
        };
        self.write_offline(table, &doc, ttl, op).await?;
        Ok(LocalDocument {
            table: table.to_string(),
            partition: doc.partition,
            document_id: doc.document_id,
            document: doc.document,
            etag,
            expiration_time: ttl.expiration_from(now),
            download_time: now,
            operation_time: now,
            pending_operation: Some(op),
        })
    }

    /// Replace the row with a DELETE tombstone, keeping any cached etag.
    pub async fn delete_offline(
        &self,
        table: &str,
        partition: &str,
        document_id: &str,
        ttl: TimeToLive,
    ) -> Result<bool, SonarError> {
        let etag = self
            .read(table, partition, document_id, None)
            .await
            .ok()
            .and_then(|cached| cached.etag);
        let doc = CachedDocument {
            partition: partition.to_string(),
            document_id: document_id.to_string(),
            document: None,
            etag,
            last_updated_ms: now_ms(),
        };
        self.write_offline(table, &doc, ttl, PendingOperation::Delete)
            .await
    }

    /// Remove a row. Returns whether one existed.
    pub async fn delete_online(
        &self,
        table: &str,
        partition: &str,
        document_id: &str,
    ) -> Result<bool, SonarError> {
        let table = checked_table(table)?;
        let (partition, document_id) = (partition.to_string(), document_id.to_string());
        self.db
            .connection()
            .call(move |conn| Ok(delete_row(conn, &table, &partition, &document_id)? > 0))
            .await
            .map_err(map_tr_err)
    }

    /// Read the cached row for (partition, document id).
    ///
    /// Expired rows are deleted and reported as [`SonarError::NotFound`].
    /// With `read_ttl`, a `NoCache` read removes the row after returning it;
    /// any other value refreshes the row's expiration when its payload is
    /// valid JSON.
    pub async fn read(
        &self,
        table: &str,
        partition: &str,
        document_id: &str,
        read_ttl: Option<TimeToLive>,
    ) -> Result<LocalDocument, SonarError> {
        debug!(partition, id = document_id, "reading document from cache");
        let table = checked_table(table)?;
        let (p, id) = (partition.to_string(), document_id.to_string());

        enum Outcome {
            Missing,
            Expired,
            Found(LocalDocument),
        }

        let outcome = self
            .db
            .connection()
            .call(move |conn| {
                let found = conn
                    .query_row(
                        &format!(
                            "SELECT {SELECT_COLUMNS} FROM {table}
                             WHERE partition = ?1 AND document_id = ?2
                             ORDER BY expiration_time DESC LIMIT 1"
                        ),
                        params![p, id],
                        |row| row_to_document(&table, row),
                    )
                    .optional()?;
                let Some(mut doc) = found else {
                    return Ok(Outcome::Missing);
                };
                let now = now_ms();
                if is_expired_at(doc.expiration_time, now) {
                    delete_row(conn, &table, &p, &id)?;
                    return Ok(Outcome::Expired);
                }
                match read_ttl {
                    Some(TimeToLive::NoCache) => {
                        delete_row(conn, &table, &p, &id)?;
                    }
                    Some(ttl) => {
                        let parses = doc
                            .document
                            .as_deref()
                            .is_some_and(|d| serde_json::from_str::<serde_json::Value>(d).is_ok());
                        if parses {
                            doc.expiration_time = ttl.expiration_from(now);
                            upsert(conn, &doc)?;
                        }
                    }
                    None => {}
                }
                Ok(Outcome::Found(doc))
            })
            .await
            .map_err(|e: tokio_rusqlite::Error<rusqlite::Error>| SonarError::CacheRead {
                message: "failed to read from cache".to_string(),
                source: Some(Box::new(e)),
            })?;

        match outcome {
            Outcome::Found(doc) => Ok(doc),
            Outcome::Expired => {
                debug!(partition, id = document_id, "cached document expired and invalidated");
                Err(SonarError::NotFound(
                    "document was found in the cache, but it was expired".to_string(),
                ))
            }
            Outcome::Missing => Err(SonarError::NotFound(
                "document was not found in the cache".to_string(),
            )),
        }
    }

    /// Rows of `table` carrying an unsynced operation.
    pub async fn pending_operations(&self, table: &str) -> Result<Vec<LocalDocument>, SonarError> {
        let table = checked_table(table)?;
        self.db
            .connection()
            .call(move |conn| {
                let docs = conn
                    .prepare(&format!(
                        "SELECT {SELECT_COLUMNS} FROM {table}
                         WHERE pending_operation IS NOT NULL ORDER BY id ASC"
                    ))?
                    .query_map([], |row| row_to_document(&table, row))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(docs)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Persist `doc` as-is, typically after a sync cleared its marker.
    pub async fn update_pending_operation(&self, doc: &LocalDocument) -> Result<(), SonarError> {
        checked_table(&doc.table)?;
        let row = doc.clone();
        self.db
            .connection()
            .call(move |conn| {
                upsert(conn, &row)?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Clear the marker of a row whose queued operation reached the server.
    ///
    /// Applies only while the row still holds the synced operation (same
    /// operation time, marker and payload). An offline write made during the
    /// sync keeps its marker and only takes the server etag. Returns whether
    /// the synced row was settled.
    pub async fn settle_synced(
        &self,
        synced: &LocalDocument,
        etag: Option<String>,
    ) -> Result<bool, SonarError> {
        let table = checked_table(&synced.table)?;
        let row = synced.clone();
        self.db
            .connection()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let settled = tx.execute(
                    &format!(
                        "UPDATE {table} SET etag = ?1, pending_operation = NULL
                         WHERE partition = ?2 AND document_id = ?3 AND operation_time = ?4
                           AND pending_operation IS ?5 AND document IS ?6"
                    ),
                    params![
                        etag,
                        row.partition,
                        row.document_id,
                        row.operation_time,
                        row.pending_operation.map(|op| op.to_string()),
                        row.document,
                    ],
                )? > 0;
                if !settled && etag.is_some() {
                    tx.execute(
                        &format!(
                            "UPDATE {table} SET etag = ?1
                             WHERE partition = ?2 AND document_id = ?3
                               AND pending_operation IS NOT NULL"
                        ),
                        params![etag, row.partition, row.document_id],
                    )?;
                }
                tx.commit()?;
                Ok(settled)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Delete a row after its queued operation settled, unless an offline
    /// write replaced the synced operation meanwhile. Returns whether the row
    /// was deleted.
    pub async fn remove_synced(&self, synced: &LocalDocument) -> Result<bool, SonarError> {
        let table = checked_table(&synced.table)?;
        let row = synced.clone();
        self.db
            .connection()
            .call(move |conn| {
                let removed = conn.execute(
                    &format!(
                        "DELETE FROM {table}
                         WHERE partition = ?1 AND document_id = ?2 AND operation_time = ?3
                           AND pending_operation IS ?4 AND document IS ?5"
                    ),
                    params![
                        row.partition,
                        row.document_id,
                        row.operation_time,
                        row.pending_operation.map(|op| op.to_string()),
                        row.document,
                    ],
                )?;
                Ok(removed > 0)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Live rows of a partition.
    ///
    /// Expired rows are purged unless they are pending deletes, a `NoCache`
    /// listing purges every row it visits, and pending-delete tombstones are
    /// never returned.
    pub async fn documents_by_partition(
        &self,
        table: &str,
        partition: &str,
        ttl: TimeToLive,
    ) -> Result<Vec<LocalDocument>, SonarError> {
        let table = checked_table(table)?;
        let partition = partition.to_string();
        self.db
            .connection()
            .call(move |conn| {
                let rows = conn
                    .prepare(&format!(
                        "SELECT {SELECT_COLUMNS} FROM {table} WHERE partition = ?1 ORDER BY id ASC"
                    ))?
                    .query_map(params![partition], |row| row_to_document(&table, row))?
                    .collect::<Result<Vec<_>, _>>()?;

                let now = now_ms();
                let mut live = Vec::new();
                for doc in rows {
                    let expired = is_expired_at(doc.expiration_time, now);
                    let tombstone = doc.pending_operation == Some(PendingOperation::Delete);
                    if (expired && !tombstone) || ttl == TimeToLive::NoCache {
                        delete_row(conn, &table, &doc.partition, &doc.document_id)?;
                    }
                    if !expired && !tombstone {
                        live.push(doc);
                    }
                }
                Ok(live)
            })
            .await
            .map_err(map_tr_err)
    }
}
