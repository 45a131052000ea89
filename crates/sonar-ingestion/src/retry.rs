// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport retries for recoverable send failures.
//!
//! [`RetryingIngestion`] wraps another [`IngestionAdapter`] and sends a batch
//! again after a recoverable failure, once per configured interval. When the
//! intervals run out the last error goes back to the channel, which then
//! suspends. A back-off named by the service replaces the interval's delay.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use sonar_config::IngestionConfig;
use sonar_core::{
    AdapterType, HealthStatus, IngestionAdapter, IngestionResponse, LogContainer, PluginAdapter,
    SonarError,
};

use crate::is_recoverable_error;

/// Delays between attempts of one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    intervals: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(intervals: Vec<Duration>) -> Self {
        Self { intervals }
    }

    pub fn from_config(config: &IngestionConfig) -> Self {
        Self::new(
            config
                .retry_intervals_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        )
    }

    /// A policy that hands the first failure straight back.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    pub fn max_retries(&self) -> usize {
        self.intervals.len()
    }

    /// Delay before retry number `retry` (zero based): half the interval plus
    /// a random share of the other half. `None` once the intervals are spent.
    pub fn delay(&self, retry: usize) -> Option<Duration> {
        let half = *self.intervals.get(retry)? / 2;
        let spread = u64::try_from(half.as_millis()).unwrap_or(u64::MAX);
        if spread == 0 {
            return Some(half);
        }
        let jitter = rand::thread_rng().gen_range(0..spread);
        Some(half + Duration::from_millis(jitter))
    }
}

/// [`IngestionAdapter`] that retries recoverable failures of `T`.
pub struct RetryingIngestion<T> {
    inner: T,
    policy: RetryPolicy,
    closed: watch::Sender<bool>,
}

impl<T: IngestionAdapter> RetryingIngestion<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            closed: watch::Sender::new(false),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<T: IngestionAdapter> PluginAdapter for RetryingIngestion<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> semver::Version {
        self.inner.version()
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Ingestion
    }

    async fn health_check(&self) -> Result<HealthStatus, SonarError> {
        self.inner.health_check().await
    }

    async fn shutdown(&self) -> Result<(), SonarError> {
        self.closed.send_replace(true);
        self.inner.shutdown().await
    }
}

#[async_trait]
impl<T: IngestionAdapter> IngestionAdapter for RetryingIngestion<T> {
    async fn send_logs(
        &self,
        app_secret: &str,
        install_id: Uuid,
        container: &LogContainer,
    ) -> Result<IngestionResponse, SonarError> {
        let mut retry = 0;
        loop {
            let error = match self.inner.send_logs(app_secret, install_id, container).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };
            if !is_recoverable_error(&error) {
                return Err(error);
            }
            let Some(interval_delay) = self.policy.delay(retry) else {
                if retry > 0 {
                    warn!(attempts = retry + 1, error = %error, "send still failing, giving up");
                }
                return Err(error);
            };
            let delay = error.retry_after().unwrap_or(interval_delay);
            retry += 1;
            warn!(
                retry,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "recoverable send failure, will retry"
            );

            let mut closed = self.closed.subscribe();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = closed.wait_for(|closed| *closed) => {
                    debug!("transport closed during back-off");
                    return Err(error);
                }
            }
        }
    }

    fn set_log_url(&self, url: &str) {
        self.inner.set_log_url(url);
    }

    fn close(&self) {
        self.closed.send_replace(true);
        self.inner.close();
    }

    fn reopen(&self) {
        self.closed.send_replace(false);
        self.inner.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HttpIngestion;
    use sonar_core::Log;
    use std::sync::Arc;
    use std::time::Instant;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn retrying(base_url: &str, intervals_ms: &[u64]) -> RetryingIngestion<HttpIngestion> {
        let config = IngestionConfig {
            log_url: base_url.to_string(),
            connect_timeout_secs: 5,
            read_timeout_secs: 5,
            retry_intervals_ms: intervals_ms.to_vec(),
        };
        RetryingIngestion::new(
            HttpIngestion::new(&config).unwrap(),
            RetryPolicy::from_config(&config),
        )
    }

    fn container() -> LogContainer {
        LogContainer {
            logs: vec![Log::new("event")],
        }
    }

    async fn requests(server: &MockServer) -> usize {
        server.received_requests().await.unwrap_or_default().len()
    }

    #[test]
    fn delay_stays_within_upper_half_of_interval() {
        let policy = RetryPolicy::new(vec![Duration::from_millis(1000)]);
        for _ in 0..50 {
            let delay = policy.delay(0).unwrap();
            assert!(delay >= Duration::from_millis(500), "{delay:?}");
            assert!(delay < Duration::from_millis(1000), "{delay:?}");
        }
        assert_eq!(policy.delay(1), None);
        assert_eq!(RetryPolicy::none().max_retries(), 0);
    }

    #[test]
    fn default_config_retries_three_times() {
        let policy = RetryPolicy::from_config(&IngestionConfig::default());
        assert_eq!(policy.max_retries(), 3);
        assert!(policy.delay(2).unwrap() >= Duration::from_secs(600));
    }

    #[tokio::test]
    async fn recovers_after_transient_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let response = retrying(&server.uri(), &[10, 10, 10])
            .send_logs("s", Uuid::new_v4(), &container())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(requests(&server).await, 3);
    }

    #[tokio::test]
    async fn gives_up_with_last_error_once_intervals_are_spent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = retrying(&server.uri(), &[5, 5])
            .send_logs("s", Uuid::new_v4(), &container())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(500));
        assert_eq!(requests(&server).await, 3);
    }

    #[tokio::test]
    async fn fatal_status_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = retrying(&server.uri(), &[5, 5, 5])
            .send_logs("s", Uuid::new_v4(), &container())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(403));
        assert_eq!(requests(&server).await, 1);
    }

    #[tokio::test]
    async fn throttled_send_waits_for_requested_back_off() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("x-ms-retry-after-ms", "300"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let started = Instant::now();
        retrying(&server.uri(), &[2])
            .send_logs("s", Uuid::new_v4(), &container())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(requests(&server).await, 2);
    }

    #[tokio::test]
    async fn close_cuts_back_off_short() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let ingestion = Arc::new(retrying(&server.uri(), &[120_000]));
        let task = {
            let ingestion = ingestion.clone();
            tokio::spawn(async move {
                ingestion
                    .send_logs("s", Uuid::new_v4(), &container())
                    .await
            })
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while requests(&server).await == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        ingestion.close();

        let err = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("back-off should end on close")
            .unwrap()
            .unwrap_err();
        assert_eq!(err.http_status(), Some(503));
        assert_eq!(requests(&server).await, 1);
    }
}
