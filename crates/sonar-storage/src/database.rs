// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and migrations.
//!
//! All statements are serialized through tokio-rusqlite's single background
//! thread. Do NOT create additional connections to the same file for writes.

use sonar_core::SonarError;
use tracing::debug;

use crate::migrations::{self, Schema};

/// Convert a tokio-rusqlite error into [`SonarError::Storage`].
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> SonarError {
    SonarError::Storage {
        source: Box::new(e),
    }
}

/// A migrated SQLite database behind one tokio-rusqlite connection.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
    path: String,
}

impl Database {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub async fn open(path: &str, wal_mode: bool, schema: Schema) -> Result<Self, SonarError> {
        if let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| SonarError::Storage {
                source: Box::new(e),
            })?;
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| SonarError::Storage {
                source: Box::new(e),
            })?;
        let db = Self {
            conn,
            path: path.to_string(),
        };
        db.prepare(wal_mode, schema).await?;
        debug!(path, ?schema, "database opened");
        Ok(db)
    }

    /// Open a private in-memory database with the same schema.
    pub async fn open_in_memory(schema: Schema) -> Result<Self, SonarError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(|e| SonarError::Storage {
                source: Box::new(e),
            })?;
        let db = Self {
            conn,
            path: ":memory:".to_string(),
        };
        db.prepare(false, schema).await?;
        Ok(db)
    }

    async fn prepare(&self, wal_mode: bool, schema: Schema) -> Result<(), SonarError> {
        self.conn
            .call(move |conn| {
                if wal_mode {
                    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                        row.get::<_, String>(0)
                    })?;
                }
                conn.pragma_update(None, "synchronous", "NORMAL")?;
                conn.busy_timeout(std::time::Duration::from_secs(5))?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;

        let migrated = self
            .conn
            .call(move |conn| Ok::<_, rusqlite::Error>(migrations::run_migrations(conn, schema)))
            .await
            .map_err(map_tr_err)?;
        migrated
    }

    /// The underlying connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `SELECT 1` round trip through the background thread.
    pub async fn ping(&self) -> Result<(), SonarError> {
        self.conn
            .call(|conn| {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Flush the WAL into the main database file.
    pub async fn checkpoint(&self) -> Result<(), SonarError> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!(path = %self.path, "WAL checkpoint complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_file_and_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("logs.db");
        let db = Database::open(path.to_str().unwrap(), true, Schema::Logs)
            .await
            .unwrap();
        assert!(path.exists());
        db.ping().await.unwrap();
        db.checkpoint().await.unwrap();
    }

    #[tokio::test]
    async fn migrations_create_expected_tables() {
        let db = Database::open_in_memory(Schema::Documents).await.unwrap();
        let tables: Vec<String> = db
            .connection()
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(map_tr_err)
            .unwrap();
        assert!(tables.contains(&"app_documents".to_string()));
        assert!(tables.contains(&"tokens".to_string()));
        assert!(!tables.contains(&"logs".to_string()));
    }

    #[tokio::test]
    async fn reopening_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("again.db");
        let path = path.to_str().unwrap();
        Database::open(path, true, Schema::Logs).await.unwrap();
        Database::open(path, true, Schema::Logs).await.unwrap();
    }
}
