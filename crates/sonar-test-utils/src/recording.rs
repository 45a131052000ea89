// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Listeners that record every callback for later assertions.

use std::sync::Mutex;
use std::time::Duration;

use uuid::Uuid;

use sonar_channel::GroupListener;
use sonar_core::{Log, SonarError};
use sonar_data::{DocumentMetadata, PendingOperation, RemoteOperationListener};

use crate::wait_until;

/// A group callback, identified by the log's id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupEvent {
    BeforeSending(Uuid),
    Success(Uuid),
    /// Log id and the rendered error.
    Failure(Uuid, String),
}

#[derive(Default)]
pub struct RecordingGroupListener {
    events: Mutex<Vec<GroupEvent>>,
}

impl RecordingGroupListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GroupEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn successes(&self) -> Vec<Uuid> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                GroupEvent::Success(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<Uuid> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                GroupEvent::Failure(id, _) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Ids of every success and failure, in callback order.
    pub fn completions(&self) -> Vec<Uuid> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                GroupEvent::Success(id) | GroupEvent::Failure(id, _) => Some(id),
                GroupEvent::BeforeSending(_) => None,
            })
            .collect()
    }

    /// Wait until `count` successes and failures were recorded.
    pub async fn wait_for_completions(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.completions().len() >= count).await
    }

    fn record(&self, event: GroupEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn id_of(log: &Log) -> Uuid {
    log.id.unwrap_or_default()
}

impl GroupListener for RecordingGroupListener {
    fn on_before_sending(&self, log: &Log) {
        self.record(GroupEvent::BeforeSending(id_of(log)));
    }

    fn on_success(&self, log: &Log) {
        self.record(GroupEvent::Success(id_of(log)));
    }

    fn on_failure(&self, log: &Log, error: &SonarError) {
        self.record(GroupEvent::Failure(id_of(log), error.to_string()));
    }
}

/// One sync completion.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEvent {
    pub operation: PendingOperation,
    pub metadata: Option<DocumentMetadata>,
    /// Rendered error for failed operations.
    pub error: Option<String>,
    /// HTTP status behind the failure, when there was one.
    pub status: Option<u16>,
}

#[derive(Default)]
pub struct RecordingRemoteListener {
    events: Mutex<Vec<RemoteEvent>>,
}

impl RecordingRemoteListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RemoteEvent> {
        self.events.lock().unwrap().clone()
    }

    pub async fn wait_for_events(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.events.lock().unwrap().len() >= count).await
    }
}

impl RemoteOperationListener for RecordingRemoteListener {
    fn on_remote_operation_completed(
        &self,
        operation: PendingOperation,
        metadata: Option<&DocumentMetadata>,
        error: Option<&SonarError>,
    ) {
        self.events.lock().unwrap().push(RemoteEvent {
            operation,
            metadata: metadata.cloned(),
            error: error.map(ToString::to_string),
            status: error.and_then(SonarError::http_status),
        });
    }
}
