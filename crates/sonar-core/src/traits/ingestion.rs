// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ingestion transport used by the channel to ship batches.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::SonarError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{IngestionResponse, LogContainer};

/// Sends log batches to the ingestion backend.
///
/// Callers race the returned future against their own cancellation; once a
/// request is committed the transport may still complete it, and the caller
/// simply ignores the outcome.
#[async_trait]
pub trait IngestionAdapter: PluginAdapter {
    /// Send one batch. Non-2xx answers surface as [`SonarError::Http`], or as
    /// [`SonarError::Throttled`] when the service names a back-off.
    async fn send_logs(
        &self,
        app_secret: &str,
        install_id: Uuid,
        container: &LogContainer,
    ) -> Result<IngestionResponse, SonarError>;

    /// Change the base URL used for subsequent sends.
    fn set_log_url(&self, url: &str);

    /// Stop accepting sends until [`reopen`](IngestionAdapter::reopen) is called.
    fn close(&self);

    /// Accept sends again after [`close`](IngestionAdapter::close).
    fn reopen(&self);
}
