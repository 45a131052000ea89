// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Remote document service and token exchange consumed by the data module.

use async_trait::async_trait;

use crate::error::SonarError;
use crate::types::{RemotePage, TokenResult};

/// Document database reachable with a partition resource token.
///
/// Payloads are exchanged in wire form so the caller decides how parse
/// failures are reported.
#[async_trait]
pub trait DocumentRemote: Send + Sync + 'static {
    /// Fetch one document.
    async fn read(&self, token: &TokenResult, document_id: &str) -> Result<String, SonarError>;

    /// Create a document, or replace it when `upsert` is set.
    async fn create_or_replace(
        &self,
        token: &TokenResult,
        payload: &str,
        upsert: bool,
    ) -> Result<String, SonarError>;

    /// Delete one document.
    async fn delete(&self, token: &TokenResult, document_id: &str) -> Result<(), SonarError>;

    /// List the documents of the token's partition, one page at a time.
    async fn list(
        &self,
        token: &TokenResult,
        continuation_token: Option<&str>,
    ) -> Result<RemotePage, SonarError>;
}

/// Exchanges the application identity for partition resource tokens.
#[async_trait]
pub trait TokenExchange: Send + Sync + 'static {
    async fn get_token(&self, partition: &str) -> Result<TokenResult, SonarError>;

    /// Point subsequent exchanges at another service URL.
    ///
    /// Exchanges without a configurable endpoint ignore this.
    fn set_base_url(&self, _url: &str) {}
}
