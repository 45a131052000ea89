// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connectivity observation.

use tokio::sync::watch;

/// Reports whether the device currently has network connectivity.
///
/// Listeners subscribe through a watch channel; dropping the receiver
/// unsubscribes.
pub trait NetworkStateProvider: Send + Sync + 'static {
    fn is_connected(&self) -> bool;

    fn subscribe(&self) -> watch::Receiver<bool>;
}
