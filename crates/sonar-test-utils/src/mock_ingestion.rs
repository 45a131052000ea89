// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock ingestion transport for deterministic channel tests.
//!
//! `MockIngestion` answers sends from a FIFO of scripted outcomes and keeps
//! every container it was handed. In hold mode each send parks until the
//! test releases it, so completion order can be chosen explicitly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;

use sonar_core::{
    AdapterType, HealthStatus, IngestionAdapter, IngestionResponse, LogContainer, PluginAdapter,
    SonarError,
};

use crate::wait_until;

/// How the next send is answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Accept,
    /// Non-2xx answer with this status.
    Status(u16),
    /// Socket-level failure.
    NetworkError,
    Timeout,
}

impl SendOutcome {
    fn into_result(self) -> Result<IngestionResponse, SonarError> {
        match self {
            SendOutcome::Accept => Ok(IngestionResponse {
                status: 200,
                body: String::new(),
                headers: Default::default(),
            }),
            SendOutcome::Status(status) => Err(SonarError::Http {
                status,
                body: format!("mock status {status}"),
            }),
            SendOutcome::NetworkError => Err(SonarError::Network {
                message: "connection reset by peer".into(),
                source: None,
            }),
            SendOutcome::Timeout => Err(SonarError::Timeout {
                duration: Duration::from_secs(20),
            }),
        }
    }
}

/// A mock ingestion adapter. Unscripted sends are accepted.
#[derive(Default)]
pub struct MockIngestion {
    outcomes: Mutex<VecDeque<SendOutcome>>,
    sent: Mutex<Vec<LogContainer>>,
    hold: AtomicBool,
    gates: Mutex<Vec<Arc<Notify>>>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    reopen_calls: AtomicUsize,
    log_url: Mutex<Option<String>>,
}

impl MockIngestion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock pre-loaded with the given outcomes.
    pub fn with_outcomes(outcomes: Vec<SendOutcome>) -> Self {
        let mock = Self::new();
        mock.outcomes.lock().unwrap().extend(outcomes);
        mock
    }

    /// Queue the answer for a future send.
    pub fn push_outcome(&self, outcome: SendOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Park every following send until [`release`](Self::release) is called
    /// with its index.
    pub fn hold_sends(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    /// Let the send with index `call` (0-based, in arrival order) complete.
    pub fn release(&self, call: usize) {
        let gate = self.gates.lock().unwrap().get(call).cloned();
        match gate {
            Some(gate) => gate.notify_one(),
            None => panic!("no held send with index {call}"),
        }
    }

    /// Containers handed to the transport, in arrival order.
    pub fn sent(&self) -> Vec<LogContainer> {
        self.sent.lock().unwrap().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Identifiers of every log sent so far, in arrival order.
    pub fn sent_log_ids(&self) -> Vec<Uuid> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .flat_map(|c| c.logs.iter().map(|log| log.id.unwrap_or_default()))
            .collect()
    }

    /// Wait until at least `count` sends arrived.
    pub async fn wait_for_sends(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.send_count() >= count).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn reopen_calls(&self) -> usize {
        self.reopen_calls.load(Ordering::SeqCst)
    }

    pub fn log_url(&self) -> Option<String> {
        self.log_url.lock().unwrap().clone()
    }
}

#[async_trait]
impl PluginAdapter for MockIngestion {
    fn name(&self) -> &str {
        "mock-ingestion"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Ingestion
    }

    async fn health_check(&self) -> Result<HealthStatus, SonarError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), SonarError> {
        Ok(())
    }
}

#[async_trait]
impl IngestionAdapter for MockIngestion {
    async fn send_logs(
        &self,
        _app_secret: &str,
        _install_id: Uuid,
        container: &LogContainer,
    ) -> Result<IngestionResponse, SonarError> {
        if self.is_closed() {
            return Err(SonarError::Cancelled);
        }
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SendOutcome::Accept);
        let gate = self.hold.load(Ordering::SeqCst).then(|| {
            let gate = Arc::new(Notify::new());
            self.gates.lock().unwrap().push(gate.clone());
            gate
        });
        self.sent.lock().unwrap().push(container.clone());
        if let Some(gate) = gate {
            gate.notified().await;
        }
        outcome.into_result()
    }

    fn set_log_url(&self, url: &str) {
        *self.log_url.lock().unwrap() = Some(url.to_string());
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
        self.reopen_calls.fetch_add(1, Ordering::SeqCst);
    }
}
