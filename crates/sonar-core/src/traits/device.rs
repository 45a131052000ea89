// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Device snapshot collection.

use async_trait::async_trait;

use crate::error::SonarError;
use crate::types::Device;

/// Produces the device snapshot attached to logs.
#[async_trait]
pub trait DeviceInfoProvider: Send + Sync + 'static {
    async fn device_info(&self) -> Result<Device, SonarError>;
}
