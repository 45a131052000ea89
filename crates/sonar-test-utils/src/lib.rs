// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Sonar integration tests.
//!
//! Provides mock adapters and harnesses for fast, deterministic tests
//! without a network or real devices.
//!
//! # Components
//!
//! - [`MockIngestion`] - scripted ingestion transport capturing every batch
//! - [`MockNetwork`] - connectivity switch backed by a watch channel
//! - [`MockDevice`] - device snapshot provider with failure injection
//! - [`MockDocumentRemote`] / [`MockTokenExchange`] - in-memory document service
//! - [`RecordingGroupListener`] / [`RecordingRemoteListener`] - callback recorders
//! - [`RecordingLogStore`] - log store wrapper recording calls, with held counts
//! - [`TestHarness`] / [`DataHarness`] - assembled channel and document stacks

pub mod harness;
pub mod mock_device;
pub mod mock_ingestion;
pub mod mock_network;
pub mod mock_remote;
pub mod recording;
pub mod recording_store;

use std::time::Duration;

pub use harness::{DataHarness, TestHarness};
pub use mock_device::MockDevice;
pub use mock_ingestion::{MockIngestion, SendOutcome};
pub use mock_network::MockNetwork;
pub use mock_remote::{MockDocumentRemote, MockTokenExchange, RemoteCall};
pub use recording::{GroupEvent, RecordingGroupListener, RecordingRemoteListener, RemoteEvent};
pub use recording_store::{RecordingLogStore, StoreCall};

/// Poll `check` until it holds or `timeout` elapses. Returns the last result.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
