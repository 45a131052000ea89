// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Messages processed by the channel worker.

use std::sync::Arc;

use sonar_core::{IngestionResponse, Log, SonarError};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::group::{GroupConfig, GroupListener, GroupStatus};
use crate::listener::ChannelListener;

pub(crate) enum Command {
    AddGroup {
        config: GroupConfig,
        listener: Option<Arc<dyn GroupListener>>,
    },
    RemoveGroup(String),
    Enqueue {
        log: Box<Log>,
        group: String,
    },
    SetEnabled(bool),
    Clear(String),
    PauseGroup(String),
    ResumeGroup(String),
    SetLogUrl(String),
    SetAppSecret(String),
    SetSessionId(Option<Uuid>),
    InvalidateDeviceCache,
    AddListener(Arc<dyn ChannelListener>),
    IsEnabled(oneshot::Sender<bool>),
    Status {
        group: String,
        reply: oneshot::Sender<Option<GroupStatus>>,
    },
    Shutdown(oneshot::Sender<()>),

    // Completions of work the worker spawned.
    CountLoaded {
        group: String,
        generation: u64,
        state: u64,
        result: Result<usize, SonarError>,
    },
    TimerFired {
        group: String,
        generation: u64,
        timer_id: u64,
    },
    SendCompleted {
        group: String,
        generation: u64,
        state: u64,
        batch_id: String,
        result: Result<IngestionResponse, SonarError>,
    },
}
