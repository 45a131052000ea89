// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Device snapshot provider with call counting and failure injection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use sonar_core::{Device, DeviceInfoProvider, SonarError};

#[derive(Default)]
pub struct MockDevice {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following snapshot request fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of snapshots requested so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The snapshot this provider hands out.
    pub fn device() -> Device {
        Device {
            sdk_name: "sonar.rust".into(),
            sdk_version: "0.1.0".into(),
            model: "Test Device".into(),
            oem_name: "Sonar".into(),
            os_name: "TestOS".into(),
            os_version: "1.0".into(),
            locale: "en_US".into(),
            time_zone_offset: 0,
            app_version: "1.0.0".into(),
            app_build: "1".into(),
            ..Device::default()
        }
    }
}

#[async_trait]
impl DeviceInfoProvider for MockDevice {
    async fn device_info(&self) -> Result<Device, SonarError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SonarError::Internal("device info unavailable".into()));
        }
        Ok(Self::device())
    }
}
