// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Batching channel for the Sonar telemetry SDK.
//!
//! Logs are persisted per group and shipped in batches once a group reaches
//! its size threshold or its interval timer fires. A recoverable transport
//! failure suspends the channel and keeps every log for a retry; a rejected
//! batch suspends it and discards the failed group's backlog, reporting each
//! discarded log to the group listener.

pub mod channel;
mod command;
pub mod group;
pub mod listener;
mod worker;

pub use channel::{Channel, ChannelDeps, ChannelSettings};
pub use group::{GroupConfig, GroupListener, GroupStatus};
pub use listener::ChannelListener;
