// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Default platform providers for hosts without their own.
//!
//! Mobile hosts plug in real connectivity and device providers. Desktop
//! tools and tests get a connectivity switch and a device snapshot built
//! from the process environment.

use async_trait::async_trait;
use chrono::{Local, Offset};
use sonar_core::{Device, DeviceInfoProvider, NetworkStateProvider, SonarError};
use tokio::sync::watch;
use tracing::debug;

/// Connectivity that only changes when told to. Starts connected.
pub struct StaticNetwork {
    state: watch::Sender<bool>,
}

impl StaticNetwork {
    pub fn new(connected: bool) -> Self {
        Self {
            state: watch::Sender::new(connected),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        debug!(connected, "connectivity changed");
        self.state.send_replace(connected);
    }
}

impl Default for StaticNetwork {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkStateProvider for StaticNetwork {
    fn is_connected(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Device snapshot describing the host process.
#[derive(Debug, Clone)]
pub struct HostDevice {
    app_version: String,
    app_build: String,
}

impl HostDevice {
    pub fn new(app_version: impl Into<String>, app_build: impl Into<String>) -> Self {
        Self {
            app_version: app_version.into(),
            app_build: app_build.into(),
        }
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"), "1")
    }
}

/// `LANG=de_DE.UTF-8` becomes `de_DE`.
fn locale_from(lang: Option<String>) -> String {
    lang.as_deref()
        .and_then(|l| l.split('.').next())
        .filter(|l| !l.is_empty() && *l != "C" && *l != "POSIX")
        .unwrap_or("en_US")
        .to_string()
}

#[async_trait]
impl DeviceInfoProvider for HostDevice {
    async fn device_info(&self) -> Result<Device, SonarError> {
        let offset_secs = Local::now().offset().fix().local_minus_utc();
        Ok(Device {
            sdk_name: "sonar.rust".into(),
            sdk_version: env!("CARGO_PKG_VERSION").into(),
            model: std::env::consts::ARCH.into(),
            oem_name: "unknown".into(),
            os_name: std::env::consts::OS.into(),
            os_version: std::env::consts::FAMILY.into(),
            locale: locale_from(std::env::var("LANG").ok()),
            time_zone_offset: offset_secs / 60,
            app_version: self.app_version.clone(),
            app_build: self.app_build.clone(),
            ..Device::default()
        })
    }
}
