// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sonar application context.
//!
//! Everything the SDK needs at runtime (configuration, log store, ingestion
//! transport, channel, document store and the started services) lives in one
//! [`AppContext`] value built by the host application and passed where it is
//! needed. There are no process-wide singletons.

pub mod context;
pub mod providers;
pub mod registry;
pub mod telemetry;

pub use context::{AppContext, AppContextBuilder};
pub use providers::{HostDevice, StaticNetwork};
pub use registry::{Service, ServiceConstructor, ServiceId, ServiceRegistry};
