// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Public channel handle.

use std::sync::Arc;
use std::time::Duration;

use sonar_config::SonarConfig;
use sonar_core::{DeviceInfoProvider, IngestionAdapter, Log, LogStore, SonarError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::command::Command;
use crate::group::{GroupConfig, GroupListener, GroupStatus};
use crate::listener::ChannelListener;
use crate::worker::ChannelWorker;

/// Collaborators the channel is written against.
pub struct ChannelDeps {
    pub store: Arc<dyn LogStore>,
    pub ingestion: Arc<dyn IngestionAdapter>,
    pub device: Arc<dyn DeviceInfoProvider>,
}

/// Startup settings for a [`Channel`].
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Sending is held until a secret is known.
    pub app_secret: Option<String>,
    pub install_id: Uuid,
    pub enabled: bool,
    /// Chunk size used when failing a discarded backlog.
    pub clear_batch_size: usize,
    pub shutdown_timeout: Duration,
    pub command_buffer: usize,
}

impl ChannelSettings {
    pub fn new(install_id: Uuid) -> Self {
        Self {
            app_secret: None,
            install_id,
            enabled: true,
            clear_batch_size: 100,
            shutdown_timeout: Duration::from_millis(5000),
            command_buffer: 1024,
        }
    }

    pub fn from_config(config: &SonarConfig, install_id: Uuid) -> Self {
        Self {
            app_secret: config.sdk.app_secret.clone(),
            install_id,
            enabled: config.sdk.enabled,
            clear_batch_size: config.channel.clear_batch_size,
            shutdown_timeout: Duration::from_millis(config.channel.shutdown_timeout_ms),
            command_buffer: config.channel.command_buffer,
        }
    }

    pub fn with_app_secret(mut self, secret: impl Into<String>) -> Self {
        self.app_secret = Some(secret.into());
        self
    }
}

/// Cloneable handle to the channel worker.
///
/// Every call is queued and applied in order by a single worker task.
/// Mutating calls return once the command is queued; accessors wait for the
/// worker's answer. Calls fail with [`SonarError::Disabled`] once the worker
/// has stopped.
#[derive(Clone)]
pub struct Channel {
    commands: mpsc::Sender<Command>,
    shutdown_timeout: Duration,
}

impl Channel {
    /// Spawn the worker on the current tokio runtime.
    pub fn start(deps: ChannelDeps, settings: ChannelSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.command_buffer.max(1));
        let worker = ChannelWorker::new(deps, &settings, rx, tx.downgrade());
        tokio::spawn(worker.run());
        Self {
            commands: tx,
            shutdown_timeout: settings.shutdown_timeout,
        }
    }

    async fn submit(&self, command: Command) -> Result<(), SonarError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SonarError::Disabled("channel worker has stopped".into()))
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SonarError> {
        let (tx, rx) = oneshot::channel();
        self.submit(command(tx)).await?;
        rx.await
            .map_err(|_| SonarError::Disabled("channel worker has stopped".into()))
    }

    /// Register a group, replacing any group with the same name.
    pub async fn add_group(
        &self,
        config: GroupConfig,
        listener: Option<Arc<dyn GroupListener>>,
    ) -> Result<(), SonarError> {
        self.submit(Command::AddGroup { config, listener }).await
    }

    /// Remove a group and delete its persisted logs.
    pub async fn remove_group(&self, name: &str) -> Result<(), SonarError> {
        self.submit(Command::RemoveGroup(name.to_string())).await
    }

    pub async fn enqueue(&self, log: Log, group: &str) -> Result<(), SonarError> {
        self.submit(Command::Enqueue {
            log: Box::new(log),
            group: group.to_string(),
        })
        .await
    }

    /// Enable or disable sending. Disabling deletes every persisted log.
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), SonarError> {
        self.submit(Command::SetEnabled(enabled)).await
    }

    /// Delete the persisted logs of one group.
    pub async fn clear(&self, group: &str) -> Result<(), SonarError> {
        self.submit(Command::Clear(group.to_string())).await
    }

    pub async fn pause_group(&self, group: &str) -> Result<(), SonarError> {
        self.submit(Command::PauseGroup(group.to_string())).await
    }

    pub async fn resume_group(&self, group: &str) -> Result<(), SonarError> {
        self.submit(Command::ResumeGroup(group.to_string())).await
    }

    pub async fn set_log_url(&self, url: &str) -> Result<(), SonarError> {
        self.submit(Command::SetLogUrl(url.to_string())).await
    }

    pub async fn set_app_secret(&self, secret: &str) -> Result<(), SonarError> {
        self.submit(Command::SetAppSecret(secret.to_string())).await
    }

    /// Session attached to logs enqueued from now on.
    pub async fn set_session_id(&self, session_id: Option<Uuid>) -> Result<(), SonarError> {
        self.submit(Command::SetSessionId(session_id)).await
    }

    /// Fetch a fresh device snapshot for the next log.
    pub async fn invalidate_device_cache(&self) -> Result<(), SonarError> {
        self.submit(Command::InvalidateDeviceCache).await
    }

    pub async fn add_listener(&self, listener: Arc<dyn ChannelListener>) -> Result<(), SonarError> {
        self.submit(Command::AddListener(listener)).await
    }

    pub async fn is_enabled(&self) -> Result<bool, SonarError> {
        self.request(Command::IsEnabled).await
    }

    /// Counters for `group`, or `None` when it is not registered.
    pub async fn group_status(&self, group: &str) -> Result<Option<GroupStatus>, SonarError> {
        let group = group.to_string();
        self.request(|reply| Command::Status { group, reply }).await
    }

    pub async fn pending_log_count(&self, group: &str) -> Result<Option<usize>, SonarError> {
        Ok(self.group_status(group).await?.map(|s| s.pending_log_count))
    }

    pub async fn in_flight_batches(&self, group: &str) -> Result<Option<usize>, SonarError> {
        Ok(self.group_status(group).await?.map(|s| s.in_flight_batches))
    }

    /// Stop the worker once every previously queued command has run.
    ///
    /// Waits at most the configured shutdown timeout. Expiry is logged, not
    /// returned as an error.
    pub async fn shutdown(&self) -> Result<(), SonarError> {
        let (tx, rx) = oneshot::channel();
        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            if self.commands.send(Command::Shutdown(tx)).await.is_err() {
                debug!("channel worker already stopped");
                return;
            }
            let _ = rx.await;
        })
        .await;

        match drained {
            Ok(()) => info!("channel shut down"),
            Err(_) => warn!(
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "timeout reached, channel shutdown incomplete"
            ),
        }
        Ok(())
    }
}
