// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types for the document cache.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Stored expiration value for documents that never expire.
pub const INFINITE_EXPIRATION: i64 = -1;

/// Unsynced operation recorded on a cached row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PendingOperation {
    Create,
    Replace,
    Delete,
}

/// How long a document stays in the device cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeToLive {
    /// Never written to the cache; existing rows are removed on read.
    NoCache,
    Infinite,
    Seconds(i64),
}

impl TimeToLive {
    pub const DEFAULT: TimeToLive = TimeToLive::Seconds(86_400);

    /// Interpret the configuration encoding: `0` no cache, negative infinite.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            0 => TimeToLive::NoCache,
            s if s < 0 => TimeToLive::Infinite,
            s => TimeToLive::Seconds(s),
        }
    }

    pub fn as_secs(self) -> i64 {
        match self {
            TimeToLive::NoCache => 0,
            TimeToLive::Infinite => -1,
            TimeToLive::Seconds(s) => s,
        }
    }

    /// Expiration timestamp (ms) for a row written at `now_ms`.
    pub fn expiration_from(self, now_ms: i64) -> i64 {
        match self {
            TimeToLive::Infinite => INFINITE_EXPIRATION,
            TimeToLive::NoCache => now_ms,
            TimeToLive::Seconds(s) => now_ms.saturating_add(s.saturating_mul(1000)),
        }
    }
}

impl Default for TimeToLive {
    fn default() -> Self {
        TimeToLive::DEFAULT
    }
}

/// Whether an expiration timestamp has passed at `now_ms`.
pub fn is_expired_at(expiration_time: i64, now_ms: i64) -> bool {
    expiration_time != INFINITE_EXPIRATION && now_ms >= expiration_time
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Document content to be written to the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedDocument {
    pub partition: String,
    pub document_id: String,
    /// Serialized document; `None` for delete tombstones.
    pub document: Option<String>,
    pub etag: Option<String>,
    /// Server or local modification time in milliseconds.
    pub last_updated_ms: i64,
}

/// One row of a document table.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDocument {
    pub table: String,
    pub partition: String,
    pub document_id: String,
    pub document: Option<String>,
    pub etag: Option<String>,
    pub expiration_time: i64,
    pub download_time: i64,
    pub operation_time: i64,
    pub pending_operation: Option<PendingOperation>,
}

impl LocalDocument {
    pub fn is_expired(&self) -> bool {
        is_expired_at(self.expiration_time, now_ms())
    }

    pub fn has_pending_operation(&self) -> bool {
        self.pending_operation.is_some()
    }

    /// Key used to track outgoing calls for this row.
    pub fn outgoing_id(&self) -> String {
        format!("{}_{}", self.partition, self.document_id)
    }
}

/// True when any row carries an unsynced create or replace.
pub fn has_pending_write(documents: &[LocalDocument]) -> bool {
    documents.iter().any(|doc| {
        matches!(
            doc.pending_operation,
            Some(PendingOperation::Create | PendingOperation::Replace)
        )
    })
}
