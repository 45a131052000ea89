// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Sonar telemetry SDK.

use thiserror::Error;

/// The primary error type used across all Sonar adapter traits and core operations.
#[derive(Debug, Error)]
pub enum SonarError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Connectivity failures below HTTP (socket, DNS, TLS handshake, I/O).
    #[error("network error: {message}")]
    Network {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The remote answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// A non-success HTTP status that told the client how long to back off.
    #[error("HTTP {status}: {body} (retry after {retry_after:?})")]
    Throttled {
        status: u16,
        body: String,
        retry_after: std::time::Duration,
    },

    /// A payload could not be serialized or deserialized.
    #[error("serialization error: {message}")]
    Serialization {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A document or record does not exist (or existed only as an expired cache entry).
    #[error("not found: {0}")]
    NotFound(String),

    /// A cached row exists but could not be read back.
    #[error("failed to read from cache: {message}")]
    CacheRead {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A caller supplied an invalid partition, document id or group.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Token resolution or exchange failed.
    #[error("token error: {message}")]
    Token {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The module is disabled or has not been started.
    #[error("disabled: {0}")]
    Disabled(String),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Requested service was not found in the registry.
    #[error("adapter not found: {adapter_type}/{name}")]
    AdapterNotFound { adapter_type: String, name: String },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SonarError {
    /// HTTP status carried by this error, if it came from a remote response.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            SonarError::Http { status, .. } | SonarError::Throttled { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Back-off the remote asked for.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            SonarError::Throttled { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Wrap a JSON error as [`SonarError::Serialization`].
    pub fn serialization(message: impl Into<String>, source: serde_json::Error) -> Self {
        SonarError::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
