// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait definitions for the seams between Sonar subsystems.
//!
//! Stateful backends extend the [`PluginAdapter`] base trait; async traits use
//! `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod device;
pub mod ingestion;
pub mod log_store;
pub mod network;
pub mod remote;

pub use adapter::PluginAdapter;
pub use device::DeviceInfoProvider;
pub use ingestion::IngestionAdapter;
pub use log_store::LogStore;
pub use network::NetworkStateProvider;
pub use remote::{DocumentRemote, TokenExchange};
