// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Group registry types: configuration, listener hooks and per-group state.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use sonar_config::GroupSettings;
use sonar_core::{Log, SonarError};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::listener::guarded;

/// Batching thresholds for one log group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupConfig {
    pub name: String,
    /// Pending logs that trigger an immediate send.
    pub batch_size: usize,
    /// Maximum time a pending log waits before a partial batch is sent.
    pub batch_interval: Duration,
    /// Maximum number of batches in flight at once.
    pub max_parallel_batches: usize,
}

impl GroupConfig {
    /// A group with the default thresholds (50 logs, 3 seconds, 3 batches).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batch_size: 50,
            batch_interval: Duration::from_millis(3000),
            max_parallel_batches: 3,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval;
        self
    }

    pub fn with_max_parallel_batches(mut self, max: usize) -> Self {
        self.max_parallel_batches = max.max(1);
        self
    }
}

impl From<&GroupSettings> for GroupConfig {
    fn from(settings: &GroupSettings) -> Self {
        GroupConfig::new(settings.name.clone())
            .with_batch_size(settings.batch_size)
            .with_batch_interval(Duration::from_millis(settings.batch_interval_ms))
            .with_max_parallel_batches(settings.max_parallel_batches)
    }
}

/// Per-log callbacks for one group.
///
/// Callbacks run on the channel worker, in enqueue order. They must not block.
pub trait GroupListener: Send + Sync + 'static {
    /// A log is about to be handed to the ingestion transport.
    fn on_before_sending(&self, _log: &Log) {}

    /// A log was accepted by the ingestion endpoint.
    fn on_success(&self, _log: &Log) {}

    /// A log was discarded and will never be sent.
    fn on_failure(&self, _log: &Log, _error: &SonarError) {}
}

/// Point-in-time view of a group's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStatus {
    pub pending_log_count: usize,
    pub in_flight_batches: usize,
    /// A count of persisted logs is still outstanding.
    pub counting: bool,
    pub timer_armed: bool,
    pub paused: bool,
}

pub(crate) struct InFlightBatch {
    pub batch_id: String,
    pub logs: Vec<Log>,
    pub cancel: CancellationToken,
    /// Accepted by the endpoint; success callbacks wait for earlier batches.
    pub succeeded: bool,
}

impl InFlightBatch {
    pub fn new(batch_id: String, logs: Vec<Log>, cancel: CancellationToken) -> Self {
        Self {
            batch_id,
            logs,
            cancel,
            succeeded: false,
        }
    }
}

/// Accepted logs whose success callbacks wait for older logs that were
/// retained by a suspension and have not been reported yet.
pub(crate) struct DeferredSuccess {
    pub logs: Vec<Log>,
    pub waiting_on: HashSet<Uuid>,
}

pub(crate) struct GroupTimer {
    pub id: u64,
    pub handle: AbortHandle,
}

pub(crate) struct GroupState {
    pub config: GroupConfig,
    pub listener: Option<Arc<dyn GroupListener>>,
    /// Unique per `add_group` call; completions carrying another value are stale.
    pub generation: u64,
    pub pending_log_count: usize,
    /// In send order.
    pub sending_batches: Vec<InFlightBatch>,
    /// In send order. Survives suspensions that keep the backlog.
    pub deferred: VecDeque<DeferredSuccess>,
    pub timer: Option<GroupTimer>,
    pub paused: bool,
    pub counting: bool,
    /// The backlog changed while a count was outstanding.
    pub recount_needed: bool,
}

impl GroupState {
    pub fn new(
        config: GroupConfig,
        listener: Option<Arc<dyn GroupListener>>,
        generation: u64,
    ) -> Self {
        Self {
            config,
            listener,
            generation,
            pending_log_count: 0,
            sending_batches: Vec::new(),
            deferred: VecDeque::new(),
            timer: None,
            paused: false,
            counting: false,
            recount_needed: false,
        }
    }

    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }

    /// Cancel every in-flight send and hand the batches back in send order.
    pub fn cancel_sends(&mut self) -> Vec<InFlightBatch> {
        let batches: Vec<InFlightBatch> = self.sending_batches.drain(..).collect();
        for batch in &batches {
            batch.cancel.cancel();
        }
        batches
    }

    /// Remove the leading batches that already succeeded, in send order.
    pub fn pop_succeeded(&mut self) -> Vec<InFlightBatch> {
        let settled = self
            .sending_batches
            .iter()
            .take_while(|b| b.succeeded)
            .count();
        self.sending_batches.drain(..settled).collect()
    }

    /// Cancel every in-flight send while keeping the logs for a retry.
    ///
    /// Batches that already succeeded are deferred until every older
    /// unfinished log of this group has been reported.
    pub fn defer_sends(&mut self) {
        let mut older = HashSet::new();
        for batch in self.cancel_sends() {
            if batch.succeeded {
                self.deferred.push_back(DeferredSuccess {
                    logs: batch.logs,
                    waiting_on: older.clone(),
                });
            } else {
                older.extend(batch.logs.iter().filter_map(|log| log.id));
            }
        }
        self.release_ready();
    }

    /// Report accepted logs, keeping enqueue order with deferred batches.
    pub fn report_success(&mut self, logs: Vec<Log>) {
        for log in logs {
            if self.deferred.is_empty() {
                self.notify_success(std::slice::from_ref(&log));
                continue;
            }
            let awaited = log
                .id
                .is_some_and(|id| self.deferred.iter().any(|d| d.waiting_on.contains(&id)));
            if awaited {
                self.notify_success(std::slice::from_ref(&log));
                self.settle(std::slice::from_ref(&log));
                continue;
            }
            match self.deferred.back_mut() {
                Some(last) if last.waiting_on.is_empty() => last.logs.push(log),
                _ => self.deferred.push_back(DeferredSuccess {
                    logs: vec![log],
                    waiting_on: HashSet::new(),
                }),
            }
        }
    }

    /// Report failed logs and release deferred successes waiting on them.
    pub fn report_failure(&mut self, logs: &[Log], error: &SonarError) {
        self.notify_failure(logs, error);
        self.settle(logs);
    }

    /// Mark logs as reported without a callback.
    pub fn settle(&mut self, logs: &[Log]) {
        if self.deferred.is_empty() {
            return;
        }
        for id in logs.iter().filter_map(|log| log.id) {
            for deferred in &mut self.deferred {
                deferred.waiting_on.remove(&id);
            }
        }
        self.release_ready();
    }

    /// Report every deferred success; the logs they waited on are gone.
    pub fn flush_deferred(&mut self) {
        while let Some(deferred) = self.deferred.pop_front() {
            self.notify_success(&deferred.logs);
        }
    }

    fn release_ready(&mut self) {
        while self
            .deferred
            .front()
            .is_some_and(|d| d.waiting_on.is_empty())
        {
            if let Some(deferred) = self.deferred.pop_front() {
                self.notify_success(&deferred.logs);
            }
        }
    }

    /// Batches still waiting for the endpoint.
    pub fn unfinished_batches(&self) -> usize {
        self.sending_batches.iter().filter(|b| !b.succeeded).count()
    }

    pub fn status(&self) -> GroupStatus {
        GroupStatus {
            pending_log_count: self.pending_log_count,
            in_flight_batches: self.unfinished_batches(),
            counting: self.counting,
            timer_armed: self.timer.is_some(),
            paused: self.paused,
        }
    }

    pub fn notify_before_sending(&self, logs: &[Log]) {
        if let Some(listener) = &self.listener {
            for log in logs {
                guarded("on_before_sending", (), || listener.on_before_sending(log));
            }
        }
    }

    pub fn notify_success(&self, logs: &[Log]) {
        if let Some(listener) = &self.listener {
            for log in logs {
                guarded("on_success", (), || listener.on_success(log));
            }
        }
    }

    pub fn notify_failure(&self, logs: &[Log], error: &SonarError) {
        if let Some(listener) = &self.listener {
            for log in logs {
                guarded("on_failure", (), || listener.on_failure(log, error));
            }
        }
    }

    /// Logs dropped without ever reaching the transport.
    pub fn notify_discarded(&self, logs: &[Log]) {
        if let Some(listener) = &self.listener {
            for log in logs {
                guarded("on_before_sending", (), || listener.on_before_sending(log));
                guarded("on_failure", (), || {
                    listener.on_failure(log, &SonarError::Cancelled)
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl GroupListener for Recorder {
        fn on_before_sending(&self, log: &Log) {
            self.calls.lock().unwrap().push(format!("before:{}", log.kind));
        }

        fn on_success(&self, log: &Log) {
            self.calls.lock().unwrap().push(format!("success:{}", log.kind));
        }

        fn on_failure(&self, log: &Log, error: &SonarError) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("failure:{}:{error}", log.kind));
        }
    }

    #[test]
    fn config_from_settings_keeps_thresholds() {
        let settings = GroupSettings {
            name: "analytics".into(),
            batch_size: 10,
            batch_interval_ms: 250,
            max_parallel_batches: 2,
        };
        let config = GroupConfig::from(&settings);
        assert_eq!(config.name, "analytics");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.batch_interval, Duration::from_millis(250));
        assert_eq!(config.max_parallel_batches, 2);
    }

    #[test]
    fn builder_clamps_zero_thresholds() {
        let config = GroupConfig::new("g")
            .with_batch_size(0)
            .with_max_parallel_batches(0);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.max_parallel_batches, 1);
    }

    #[test]
    fn cancel_sends_trips_every_token() {
        let mut state = GroupState::new(GroupConfig::new("g"), None, 1);
        let token = CancellationToken::new();
        state
            .sending_batches
            .push(InFlightBatch::new("a".into(), Vec::new(), token.clone()));
        let batches = state.cancel_sends();
        assert_eq!(batches.len(), 1);
        assert!(token.is_cancelled());
        assert_eq!(state.status().in_flight_batches, 0);
    }

    #[test]
    fn succeeded_batches_wait_for_earlier_ones() {
        let mut state = GroupState::new(GroupConfig::new("g"), None, 1);
        for id in ["a", "b", "c"] {
            state.sending_batches.push(InFlightBatch::new(
                id.into(),
                Vec::new(),
                CancellationToken::new(),
            ));
        }
        state.sending_batches[1].succeeded = true;
        assert!(state.pop_succeeded().is_empty());
        assert_eq!(state.unfinished_batches(), 2);

        state.sending_batches[0].succeeded = true;
        let settled: Vec<_> = state
            .pop_succeeded()
            .into_iter()
            .map(|b| b.batch_id)
            .collect();
        assert_eq!(settled, ["a", "b"]);
        assert_eq!(state.sending_batches.len(), 1);
    }

    fn recorded_state() -> (GroupState, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let state = GroupState::new(
            GroupConfig::new("g"),
            Some(recorder.clone() as Arc<dyn GroupListener>),
            1,
        );
        (state, recorder)
    }

    fn batch(id: &str, kind: &str, succeeded: bool) -> InFlightBatch {
        let mut batch = InFlightBatch::new(
            id.into(),
            vec![Log::new(kind)],
            CancellationToken::new(),
        );
        batch.succeeded = succeeded;
        batch
    }

    #[test]
    fn deferred_success_waits_for_retried_log() {
        let (mut state, recorder) = recorded_state();
        state.sending_batches.push(batch("a", "first", false));
        state.sending_batches.push(batch("b", "second", true));
        let retried = state.sending_batches[0].logs.clone();

        state.defer_sends();
        assert!(recorder.calls.lock().unwrap().is_empty());
        assert_eq!(state.deferred.len(), 1);

        // A newer log accepted before the retry queues behind the deferred batch.
        state.report_success(vec![Log::new("third")]);
        assert!(recorder.calls.lock().unwrap().is_empty());

        state.report_success(retried);
        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(calls, ["success:first", "success:second", "success:third"]);
        assert!(state.deferred.is_empty());
    }

    #[test]
    fn failed_retry_releases_deferred_success() {
        let (mut state, recorder) = recorded_state();
        state.sending_batches.push(batch("a", "first", false));
        state.sending_batches.push(batch("b", "second", true));
        let retried = state.sending_batches[0].logs.clone();
        state.defer_sends();

        state.report_failure(&retried, &SonarError::Cancelled);
        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            ["failure:first:operation cancelled", "success:second"]
        );
    }

    #[test]
    fn flush_reports_every_deferred_batch() {
        let (mut state, recorder) = recorded_state();
        state.sending_batches.push(batch("a", "first", false));
        state.sending_batches.push(batch("b", "second", true));
        state.defer_sends();

        state.flush_deferred();
        assert_eq!(*recorder.calls.lock().unwrap(), ["success:second"]);
        assert!(state.deferred.is_empty());
    }

    #[test]
    fn notifications_follow_log_order() {
        let recorder = Arc::new(Recorder::default());
        let state = GroupState::new(
            GroupConfig::new("g"),
            Some(recorder.clone() as Arc<dyn GroupListener>),
            1,
        );
        let logs = vec![Log::new("first"), Log::new("second")];
        state.notify_before_sending(&logs);
        state.notify_failure(&logs, &SonarError::Cancelled);
        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            [
                "before:first",
                "before:second",
                "failure:first:operation cancelled",
                "failure:second:operation cancelled",
            ]
        );
    }
}
