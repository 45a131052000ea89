// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity and lifecycle shared by the log stores and transports.

use async_trait::async_trait;

use crate::error::SonarError;
use crate::types::{AdapterType, HealthStatus};

/// A backend owning a resource the SDK must release on shutdown: a SQLite
/// connection or an HTTP client.
#[async_trait]
pub trait PluginAdapter: Send + Sync + 'static {
    /// Stable name used in logs and health reports.
    fn name(&self) -> &str;

    fn version(&self) -> semver::Version;

    fn adapter_type(&self) -> AdapterType;

    /// `name vX.Y.Z (Type)`, for startup logs.
    fn describe(&self) -> String {
        format!("{} v{} ({})", self.name(), self.version(), self.adapter_type())
    }

    /// A fallback store reports `Degraded` rather than an error.
    async fn health_check(&self) -> Result<HealthStatus, SonarError>;

    /// Flush and release the resource. Unsent logs stay persisted.
    async fn shutdown(&self) -> Result<(), SonarError>;
}
