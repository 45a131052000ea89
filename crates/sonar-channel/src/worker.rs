// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The channel worker.
//!
//! One task owns every group's state and applies commands strictly in
//! arrival order. Anything slow (store counts, batch timers, HTTP sends) is
//! spawned and reports back through the same command queue, stamped with the
//! group generation and the channel state counter it was started under. A
//! completion whose stamps no longer match is dropped.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use chrono::Utc;
use sonar_core::{
    Device, DeviceInfoProvider, IngestionAdapter, IngestionResponse, Log, LogBatch, LogContainer,
    LogStore, SonarError,
};
use sonar_ingestion::{is_recoverable_error, mask_secret};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channel::{ChannelDeps, ChannelSettings};
use crate::command::Command;
use crate::group::{GroupConfig, GroupListener, GroupState, GroupTimer, InFlightBatch};
use crate::listener::{guarded, ChannelListener};

/// What happens to persisted logs when the channel stops sending.
enum Suspension<'a> {
    /// Keep everything for a retry after re-enabling.
    Retain,
    /// Delete every group's backlog without callbacks.
    Discard,
    /// Fail one group's in-flight and persisted logs; keep the others.
    Fail {
        group: &'a str,
        batch_id: &'a str,
        error: &'a SonarError,
    },
}

pub(crate) struct ChannelWorker {
    store: Arc<dyn LogStore>,
    ingestion: Arc<dyn IngestionAdapter>,
    device_provider: Arc<dyn DeviceInfoProvider>,
    commands: mpsc::Receiver<Command>,
    completions: mpsc::WeakSender<Command>,
    groups: HashMap<String, GroupState>,
    listeners: Vec<Arc<dyn ChannelListener>>,
    app_secret: Option<String>,
    install_id: Uuid,
    session_id: Option<Uuid>,
    device: Option<Device>,
    enabled: bool,
    discard_logs: bool,
    state: u64,
    next_generation: u64,
    next_timer: u64,
    clear_batch_size: usize,
}

impl ChannelWorker {
    pub(crate) fn new(
        deps: ChannelDeps,
        settings: &ChannelSettings,
        commands: mpsc::Receiver<Command>,
        completions: mpsc::WeakSender<Command>,
    ) -> Self {
        Self {
            store: deps.store,
            ingestion: deps.ingestion,
            device_provider: deps.device,
            commands,
            completions,
            groups: HashMap::new(),
            listeners: Vec::new(),
            app_secret: settings.app_secret.clone(),
            install_id: settings.install_id,
            session_id: None,
            device: None,
            enabled: settings.enabled,
            discard_logs: !settings.enabled,
            state: 0,
            next_generation: 0,
            next_timer: 0,
            clear_batch_size: settings.clear_batch_size.max(1),
        }
    }

    pub(crate) async fn run(mut self) {
        info!(
            install_id = %self.install_id,
            enabled = self.enabled,
            "channel worker started"
        );
        while let Some(command) = self.commands.recv().await {
            if self.handle(command).await.is_break() {
                info!("channel worker stopped");
                return;
            }
        }
        debug!("all channel handles dropped, stopping worker");
        self.suspend(Suspension::Retain).await;
    }

    async fn handle(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::AddGroup { config, listener } => self.add_group(config, listener).await,
            Command::RemoveGroup(name) => self.remove_group(&name).await,
            Command::Enqueue { log, group } => self.enqueue(*log, &group).await,
            Command::SetEnabled(enabled) => self.set_enabled(enabled).await,
            Command::Clear(name) => self.clear(&name).await,
            Command::PauseGroup(name) => self.pause_group(&name),
            Command::ResumeGroup(name) => self.resume_group(&name).await,
            Command::SetLogUrl(url) => {
                debug!(url = %url, "log url changed");
                self.ingestion.set_log_url(&url);
            }
            Command::SetAppSecret(secret) => self.set_app_secret(secret).await,
            Command::SetSessionId(session_id) => self.session_id = session_id,
            Command::InvalidateDeviceCache => {
                debug!("device snapshot invalidated");
                self.device = None;
            }
            Command::AddListener(listener) => self.listeners.push(listener),
            Command::IsEnabled(reply) => {
                let _ = reply.send(self.enabled);
            }
            Command::Status { group, reply } => {
                let _ = reply.send(self.groups.get(&group).map(GroupState::status));
            }
            Command::Shutdown(ack) => {
                self.suspend(Suspension::Retain).await;
                for state in self.groups.values_mut() {
                    state.flush_deferred();
                }
                let _ = ack.send(());
                return ControlFlow::Break(());
            }
            Command::CountLoaded {
                group,
                generation,
                state,
                result,
            } => self.count_loaded(&group, generation, state, result).await,
            Command::TimerFired {
                group,
                generation,
                timer_id,
            } => self.timer_fired(&group, generation, timer_id).await,
            Command::SendCompleted {
                group,
                generation,
                state,
                batch_id,
                result,
            } => {
                self.send_completed(&group, generation, state, &batch_id, result)
                    .await
            }
        }
        ControlFlow::Continue(())
    }

    async fn add_group(&mut self, config: GroupConfig, listener: Option<Arc<dyn GroupListener>>) {
        let name = config.name.clone();
        if let Some(mut previous) = self.groups.remove(&name) {
            debug!(group = %name, "replacing existing group");
            previous.cancel_timer();
            for batch in previous.cancel_sends() {
                if batch.succeeded {
                    previous.report_success(batch.logs);
                } else if let Err(e) = self.store.release_batch(&name, &batch.batch_id).await {
                    warn!(group = %name, batch_id = %batch.batch_id, error = %e, "failed to release batch");
                }
            }
            previous.flush_deferred();
        }

        self.next_generation += 1;
        let state = GroupState::new(config.clone(), listener, self.next_generation);
        self.groups.insert(name.clone(), state);
        info!(
            group = %name,
            batch_size = config.batch_size,
            interval_ms = config.batch_interval.as_millis() as u64,
            max_parallel = config.max_parallel_batches,
            "group added"
        );
        self.notify_listeners("on_group_added", |l| l.on_group_added(&name, &config));
        self.spawn_count(&name);
    }

    async fn remove_group(&mut self, name: &str) {
        let Some(mut state) = self.groups.remove(name) else {
            debug!(group = name, "remove of unknown group ignored");
            return;
        };
        state.cancel_timer();
        for batch in state.cancel_sends() {
            if batch.succeeded {
                state.report_success(batch.logs);
            }
        }
        state.flush_deferred();
        match self.store.delete_group(name).await {
            Ok(deleted) => info!(group = name, deleted, "group removed"),
            Err(e) => error!(group = name, error = %e, "failed to delete logs of removed group"),
        }
        self.notify_listeners("on_group_removed", |l| l.on_group_removed(name));
    }

    async fn enqueue(&mut self, mut log: Log, group: &str) {
        let Some(state) = self.groups.get(group) else {
            error!(group, kind = %log.kind, "enqueue to unknown group, log dropped");
            return;
        };
        if self.discard_logs {
            debug!(group, "channel disabled, failing log");
            state.notify_discarded(std::slice::from_ref(&log));
            return;
        }

        for listener in &self.listeners {
            guarded("on_preparing_log", (), || {
                listener.on_preparing_log(&mut log, group)
            });
        }

        let Some(device) = self.device_snapshot().await else {
            return;
        };
        if log.device.is_none() {
            log.device = Some(device);
        }
        if log.timestamp.is_none() {
            log.timestamp = Some(Utc::now());
        }
        if log.sid.is_none() {
            log.sid = self.session_id;
        }

        for listener in &self.listeners {
            guarded("on_prepared_log", (), || listener.on_prepared_log(&log, group));
        }
        let filtered = self
            .listeners
            .iter()
            .any(|l| guarded("should_filter", false, || l.should_filter(&log)));
        if filtered {
            debug!(group, kind = %log.kind, "log filtered by listener");
            return;
        }

        if let Err(e) = self.store.put(group, &log).await {
            error!(group, error = %e, "failed to persist log");
            if let Some(state) = self.groups.get(group) {
                let logs = std::slice::from_ref(&log);
                state.notify_before_sending(logs);
                state.notify_failure(logs, &e);
            }
            return;
        }

        let Some(state) = self.groups.get_mut(group) else {
            return;
        };
        state.pending_log_count += 1;
        if state.counting {
            state.recount_needed = true;
        }
        debug!(group, pending = state.pending_log_count, "log persisted");
        if self.enabled {
            self.check_pending_logs(group).await;
        }
    }

    async fn device_snapshot(&mut self) -> Option<Device> {
        if self.device.is_none() {
            match self.device_provider.device_info().await {
                Ok(device) => self.device = Some(device),
                Err(e) => {
                    warn!(error = %e, "device info unavailable, log dropped");
                    return None;
                }
            }
        }
        self.device.clone()
    }

    async fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        if enabled {
            self.enabled = true;
            self.discard_logs = false;
            self.state += 1;
            self.ingestion.reopen();
            let names: Vec<String> = self.groups.keys().cloned().collect();
            for name in names {
                self.spawn_count(&name);
            }
            info!("channel enabled");
        } else {
            self.suspend(Suspension::Discard).await;
            info!("channel disabled");
        }
        self.notify_listeners("on_globally_enabled", |l| l.on_globally_enabled(enabled));
    }

    async fn clear(&mut self, name: &str) {
        if !self.groups.contains_key(name) {
            return;
        }
        match self.store.delete_group(name).await {
            Ok(deleted) => debug!(group = name, deleted, "group logs cleared"),
            Err(e) => error!(group = name, error = %e, "failed to clear group logs"),
        }
        if let Some(state) = self.groups.get_mut(name) {
            state.pending_log_count = 0;
            state.cancel_timer();
            state.flush_deferred();
            if state.counting {
                state.recount_needed = true;
            }
        }
        self.notify_listeners("on_clear", |l| l.on_clear(name));
    }

    fn pause_group(&mut self, name: &str) {
        let Some(state) = self.groups.get_mut(name) else {
            return;
        };
        if state.paused {
            return;
        }
        state.paused = true;
        state.cancel_timer();
        info!(group = name, "group paused");
        self.notify_listeners("on_paused", |l| l.on_paused(name));
    }

    async fn resume_group(&mut self, name: &str) {
        let Some(state) = self.groups.get_mut(name) else {
            return;
        };
        if !state.paused {
            return;
        }
        state.paused = false;
        info!(group = name, "group resumed");
        self.notify_listeners("on_resumed", |l| l.on_resumed(name));
        self.check_pending_logs(name).await;
    }

    async fn set_app_secret(&mut self, secret: String) {
        info!(app_secret = %mask_secret(&secret), "app secret set");
        self.app_secret = Some(secret);
        let names: Vec<String> = self.groups.keys().cloned().collect();
        for name in names {
            self.check_pending_logs(&name).await;
        }
    }

    /// Count the group's persisted backlog off the worker.
    fn spawn_count(&mut self, name: &str) {
        let Some(state) = self.groups.get_mut(name) else {
            return;
        };
        state.counting = true;
        state.recount_needed = false;

        let store = Arc::clone(&self.store);
        let completions = self.completions.clone();
        let group = name.to_string();
        let generation = state.generation;
        let channel_state = self.state;
        tokio::spawn(async move {
            let result = store.count(&group).await;
            if let Some(tx) = completions.upgrade() {
                let _ = tx
                    .send(Command::CountLoaded {
                        group,
                        generation,
                        state: channel_state,
                        result,
                    })
                    .await;
            }
        });
    }

    async fn count_loaded(
        &mut self,
        name: &str,
        generation: u64,
        channel_state: u64,
        result: Result<usize, SonarError>,
    ) {
        let current_state = self.state;
        let Some(state) = self.groups.get_mut(name) else {
            debug!(group = name, "count for removed group dropped");
            return;
        };
        if state.generation != generation || channel_state != current_state {
            debug!(group = name, "stale log count dropped");
            return;
        }
        match result {
            Ok(count) => {
                state.pending_log_count = count;
                if state.recount_needed {
                    self.spawn_count(name);
                    return;
                }
                debug!(group = name, count, "persisted logs counted");
            }
            Err(e) => {
                error!(group = name, error = %e, "failed to count persisted logs");
            }
        }
        state.counting = false;
        self.check_pending_logs(name).await;
    }

    async fn check_pending_logs(&mut self, name: &str) {
        if !self.enabled || self.app_secret.is_none() {
            return;
        }
        let Some(state) = self.groups.get(name) else {
            return;
        };
        if state.paused || state.counting {
            return;
        }
        if state.pending_log_count >= state.config.batch_size {
            self.trigger_ingestion(name).await;
        } else if state.pending_log_count > 0 {
            self.arm_timer(name);
        }
    }

    fn arm_timer(&mut self, name: &str) {
        let Some(state) = self.groups.get_mut(name) else {
            return;
        };
        if state.timer.is_some() {
            return;
        }
        self.next_timer += 1;
        let timer_id = self.next_timer;
        let generation = state.generation;
        let interval = state.config.batch_interval;
        let completions = self.completions.clone();
        let group = name.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(tx) = completions.upgrade() {
                let _ = tx
                    .send(Command::TimerFired {
                        group,
                        generation,
                        timer_id,
                    })
                    .await;
            }
        })
        .abort_handle();
        state.timer = Some(GroupTimer {
            id: timer_id,
            handle,
        });
    }

    async fn timer_fired(&mut self, name: &str, generation: u64, timer_id: u64) {
        let Some(state) = self.groups.get_mut(name) else {
            return;
        };
        let current = state
            .timer
            .as_ref()
            .is_some_and(|t| t.id == timer_id && state.generation == generation);
        if !current {
            debug!(group = name, "stale timer dropped");
            return;
        }
        state.timer = None;
        self.trigger_ingestion(name).await;
    }

    /// Form one batch from the oldest pending logs and send it.
    async fn trigger_ingestion(&mut self, name: &str) {
        if !self.enabled {
            return;
        }
        let Some(app_secret) = self.app_secret.clone() else {
            return;
        };
        let limit = {
            let Some(state) = self.groups.get_mut(name) else {
                return;
            };
            if state.paused {
                return;
            }
            state.cancel_timer();
            if state.unfinished_batches() >= state.config.max_parallel_batches {
                debug!(
                    group = name,
                    max = state.config.max_parallel_batches,
                    "max parallel batches in flight"
                );
                return;
            }
            state.pending_log_count.min(state.config.batch_size)
        };
        if limit == 0 {
            return;
        }

        let fetched = self.store.get_logs(name, limit).await;
        let Some(state) = self.groups.get_mut(name) else {
            return;
        };
        let batch = match fetched {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                state.pending_log_count = 0;
                return;
            }
            Err(e) => {
                error!(group = name, error = %e, "failed to fetch logs for batch");
                return;
            }
        };
        state.pending_log_count = state.pending_log_count.saturating_sub(batch.logs.len());
        debug!(
            group = name,
            batch_id = %batch.batch_id,
            logs = batch.logs.len(),
            pending = state.pending_log_count,
            "sending batch"
        );
        state.notify_before_sending(&batch.logs);

        let cancel = CancellationToken::new();
        state.sending_batches.push(InFlightBatch::new(
            batch.batch_id.clone(),
            batch.logs.clone(),
            cancel.clone(),
        ));
        let generation = state.generation;
        self.spawn_send(name, generation, batch, app_secret, cancel);
    }

    fn spawn_send(
        &self,
        name: &str,
        generation: u64,
        batch: LogBatch,
        app_secret: String,
        cancel: CancellationToken,
    ) {
        let ingestion = Arc::clone(&self.ingestion);
        let completions = self.completions.clone();
        let install_id = self.install_id;
        let channel_state = self.state;
        let group = name.to_string();
        tokio::spawn(async move {
            let container = LogContainer { logs: batch.logs };
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(group = %group, batch_id = %batch.batch_id, "send cancelled");
                    return;
                }
                result = ingestion.send_logs(&app_secret, install_id, &container) => result,
            };
            if let Some(tx) = completions.upgrade() {
                let _ = tx
                    .send(Command::SendCompleted {
                        group,
                        generation,
                        state: channel_state,
                        batch_id: batch.batch_id,
                        result,
                    })
                    .await;
            }
        });
    }

    async fn send_completed(
        &mut self,
        name: &str,
        generation: u64,
        channel_state: u64,
        batch_id: &str,
        result: Result<IngestionResponse, SonarError>,
    ) {
        if channel_state != self.state {
            debug!(group = name, batch_id, "send completion after state change dropped");
            return;
        }
        let Some(state) = self.groups.get_mut(name) else {
            debug!(group = name, batch_id, "send completion for removed group dropped");
            return;
        };
        let tracked = state.generation == generation
            && state
                .sending_batches
                .iter()
                .any(|b| b.batch_id == batch_id && !b.succeeded);
        if !tracked {
            debug!(group = name, batch_id, "stale send completion dropped");
            return;
        }

        match result {
            Ok(response) => {
                if let Some(batch) = state
                    .sending_batches
                    .iter_mut()
                    .find(|b| b.batch_id == batch_id)
                {
                    batch.succeeded = true;
                }
                debug!(group = name, batch_id, status = response.status, "batch accepted");
                if let Err(e) = self.store.delete_batch(name, batch_id).await {
                    error!(group = name, batch_id, error = %e, "failed to delete sent logs");
                }
                if let Some(state) = self.groups.get_mut(name) {
                    for batch in state.pop_succeeded() {
                        state.report_success(batch.logs);
                    }
                }
                self.check_pending_logs(name).await;
            }
            Err(error) if is_recoverable_error(&error) => {
                warn!(
                    group = name,
                    batch_id,
                    error = %error,
                    "recoverable send failure, suspending channel"
                );
                // The batch stays tracked so later accepted batches defer behind it.
                let retained = state
                    .sending_batches
                    .iter()
                    .find(|b| b.batch_id == batch_id)
                    .map_or(0, |b| b.logs.len());
                state.pending_log_count += retained;
                self.suspend(Suspension::Retain).await;
            }
            Err(error) => {
                error!(
                    group = name,
                    batch_id,
                    error = %error,
                    "send rejected, discarding group logs"
                );
                self.suspend(Suspension::Fail {
                    group: name,
                    batch_id,
                    error: &error,
                })
                .await;
            }
        }
    }

    async fn suspend(&mut self, mode: Suspension<'_>) {
        self.enabled = false;
        self.discard_logs = !matches!(mode, Suspension::Retain);
        self.state += 1;

        let failed = match &mode {
            Suspension::Fail {
                group,
                batch_id,
                error,
            } => Some((*group, *batch_id, *error)),
            _ => None,
        };
        let discard = matches!(mode, Suspension::Discard);
        for (name, state) in self.groups.iter_mut() {
            state.cancel_timer();
            match failed {
                Some((group, batch_id, error)) if group == name.as_str() => {
                    for batch in state.cancel_sends() {
                        if batch.succeeded {
                            state.report_success(batch.logs);
                        } else if batch.batch_id == batch_id {
                            state.report_failure(&batch.logs, error);
                        } else {
                            state.report_failure(&batch.logs, &SonarError::Cancelled);
                        }
                    }
                }
                _ if discard => {
                    for batch in state.cancel_sends() {
                        if batch.succeeded {
                            state.report_success(batch.logs);
                        }
                    }
                    state.flush_deferred();
                }
                // Accepted batches behind an unfinished one wait for its retry.
                _ => state.defer_sends(),
            }
        }
        self.ingestion.close();

        match mode {
            Suspension::Retain => {
                if let Err(e) = self.store.clear_pending_state().await {
                    error!(error = %e, "failed to clear pending log state");
                }
            }
            Suspension::Discard => {
                let names: Vec<String> = self.groups.keys().cloned().collect();
                for name in names {
                    self.delete_backlog(&name).await;
                }
            }
            Suspension::Fail { group, .. } => {
                self.drain_failed_group(group).await;
                if let Some(state) = self.groups.get_mut(group) {
                    state.flush_deferred();
                }
                if let Err(e) = self.store.clear_pending_state().await {
                    error!(error = %e, "failed to clear pending log state");
                }
            }
        }
    }

    /// Fail the group's persisted backlog chunk by chunk, then delete it.
    async fn drain_failed_group(&mut self, name: &str) {
        let has_listener = self
            .groups
            .get(name)
            .is_some_and(|state| state.listener.is_some());
        if has_listener {
            loop {
                match self.store.get_logs(name, self.clear_batch_size).await {
                    Ok(Some(chunk)) => {
                        if let Some(state) = self.groups.get_mut(name) {
                            state.notify_discarded(&chunk.logs);
                            state.settle(&chunk.logs);
                        }
                        if chunk.logs.len() < self.clear_batch_size {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(group = name, error = %e, "failed to read backlog for discard");
                        break;
                    }
                }
            }
        }
        self.delete_backlog(name).await;
    }

    async fn delete_backlog(&mut self, name: &str) {
        match self.store.delete_group(name).await {
            Ok(deleted) => info!(group = name, deleted, "group backlog discarded"),
            Err(e) => error!(group = name, error = %e, "failed to delete group backlog"),
        }
        if let Some(state) = self.groups.get_mut(name) {
            state.pending_log_count = 0;
        }
    }

    fn notify_listeners(&self, callback: &'static str, f: impl Fn(&dyn ChannelListener)) {
        for listener in &self.listeners {
            guarded(callback, (), || f(listener.as_ref()));
        }
    }
}
