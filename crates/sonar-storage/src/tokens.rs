// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persisted partition tokens, stored alongside the document cache.
//!
//! Values are kept in wire form; parsing and validity checks belong to the
//! caller so a corrupted entry can be reported rather than failing the query.

use rusqlite::{params, OptionalExtension};

use sonar_core::SonarError;

use crate::database::{map_tr_err, Database};

#[derive(Clone)]
pub struct TokenCache {
    db: Database,
}

impl TokenCache {
    /// Use the `tokens` table of a document database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get(&self, partition: &str) -> Result<Option<String>, SonarError> {
        let partition = partition.to_string();
        self.db
            .connection()
            .call(move |conn| {
                let token = conn
                    .query_row(
                        "SELECT token FROM tokens WHERE partition = ?1",
                        params![partition],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(token)
            })
            .await
            .map_err(map_tr_err)
    }

    pub async fn set(&self, partition: &str, token: &str) -> Result<(), SonarError> {
        let (partition, token) = (partition.to_string(), token.to_string());
        self.db
            .connection()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO tokens (partition, token) VALUES (?1, ?2)
                     ON CONFLICT(partition) DO UPDATE SET
                        token = excluded.token,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                    params![partition, token],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Remove every token except the one stored under `keep`.
    pub async fn remove_all_except(&self, keep: &str) -> Result<usize, SonarError> {
        let keep = keep.to_string();
        self.db
            .connection()
            .call(move |conn| {
                let n = conn.execute("DELETE FROM tokens WHERE partition != ?1", params![keep])?;
                Ok(n)
            })
            .await
            .map_err(map_tr_err)
    }
}
