// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! reqwest-based [`IngestionAdapter`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use tracing::{debug, warn};
use uuid::Uuid;

use sonar_config::IngestionConfig;
use sonar_core::{
    AdapterType, HealthStatus, IngestionAdapter, IngestionResponse, LogContainer, PluginAdapter,
    SonarError,
};

const API_PATH: &str = "/logs?api-version=1.0.0";
const APP_SECRET: &str = "App-Secret";
const INSTALL_ID: &str = "Install-ID";
const RETRY_AFTER_MS: &str = "x-ms-retry-after-ms";

/// Characters of a secret left readable in logs.
const VISIBLE_SECRET_CHARS: usize = 8;

/// Replace all but the last characters of `secret` with `*`.
pub fn mask_secret(secret: &str) -> String {
    let len = secret.chars().count();
    let hidden = len.saturating_sub(VISIBLE_SECRET_CHARS);
    secret
        .chars()
        .enumerate()
        .map(|(i, c)| if i < hidden { '*' } else { c })
        .collect()
}

/// Back-off the service asked for, in `x-ms-retry-after-ms` or else in
/// standard `Retry-After` seconds.
fn requested_back_off(headers: &HashMap<String, String>) -> Option<Duration> {
    let parse = |name: &str| headers.get(name).and_then(|v| v.trim().parse::<u64>().ok());
    parse(RETRY_AFTER_MS)
        .map(Duration::from_millis)
        .or_else(|| parse(RETRY_AFTER.as_str()).map(Duration::from_secs))
}

/// Copy of `container` as it goes on the wire: absolute timestamps become
/// offsets relative to `now`.
fn wire_container(container: &LogContainer, now: chrono::DateTime<Utc>) -> LogContainer {
    let mut wire = container.clone();
    for log in &mut wire.logs {
        if let Some(timestamp) = log.timestamp.take() {
            log.toffset = Some((now - timestamp).num_milliseconds());
        }
    }
    wire
}

/// Sends log batches to the ingestion endpoint over HTTPS.
#[derive(Debug)]
pub struct HttpIngestion {
    client: reqwest::Client,
    log_url: RwLock<String>,
    read_timeout: Duration,
    closed: AtomicBool,
}

impl HttpIngestion {
    pub fn new(config: &IngestionConfig) -> Result<Self, SonarError> {
        let read_timeout = Duration::from_secs(config.read_timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| SonarError::Network {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            client,
            log_url: RwLock::new(config.log_url.clone()),
            read_timeout,
            closed: AtomicBool::new(false),
        })
    }

    fn endpoint(&self) -> String {
        let base = self
            .log_url
            .read()
            .map(|url| url.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());
        format!("{}{API_PATH}", base.trim_end_matches('/'))
    }

    fn map_request_error(&self, e: reqwest::Error) -> SonarError {
        if e.is_timeout() {
            SonarError::Timeout {
                duration: self.read_timeout,
            }
        } else {
            SonarError::Network {
                message: format!("ingestion request failed: {e}"),
                source: Some(Box::new(e)),
            }
        }
    }
}

#[async_trait]
impl PluginAdapter for HttpIngestion {
    fn name(&self) -> &str {
        "http-ingestion"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Ingestion
    }

    async fn health_check(&self) -> Result<HealthStatus, SonarError> {
        if self.closed.load(Ordering::Acquire) {
            Ok(HealthStatus::Degraded("ingestion closed".to_string()))
        } else {
            Ok(HealthStatus::Healthy)
        }
    }

    async fn shutdown(&self) -> Result<(), SonarError> {
        self.close();
        Ok(())
    }
}

#[async_trait]
impl IngestionAdapter for HttpIngestion {
    async fn send_logs(
        &self,
        app_secret: &str,
        install_id: Uuid,
        container: &LogContainer,
    ) -> Result<IngestionResponse, SonarError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SonarError::Cancelled);
        }

        let body = serde_json::to_vec(&wire_container(container, Utc::now()))
            .map_err(|e| SonarError::serialization("log container", e))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            APP_SECRET,
            HeaderValue::from_str(app_secret)
                .map_err(|e| SonarError::Config(format!("invalid app secret header value: {e}")))?,
        );
        headers.insert(
            INSTALL_ID,
            HeaderValue::from_str(&install_id.to_string())
                .map_err(|e| SonarError::Internal(format!("invalid install id header: {e}")))?,
        );

        let url = self.endpoint();
        debug!(
            url = %url,
            app_secret = %mask_secret(app_secret),
            install_id = %install_id,
            count = container.logs.len(),
            "sending logs"
        );

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        let response_headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_request_error(e))?;

        if status.is_success() {
            debug!(status = status.as_u16(), "logs accepted");
            Ok(IngestionResponse {
                status: status.as_u16(),
                body,
                headers: response_headers,
            })
        } else {
            warn!(status = status.as_u16(), body = %body, "ingestion rejected batch");
            match requested_back_off(&response_headers) {
                Some(retry_after) => Err(SonarError::Throttled {
                    status: status.as_u16(),
                    body,
                    retry_after,
                }),
                None => Err(SonarError::Http {
                    status: status.as_u16(),
                    body,
                }),
            }
        }
    }

    fn set_log_url(&self, url: &str) {
        match self.log_url.write() {
            Ok(mut current) => *current = url.to_string(),
            Err(poisoned) => *poisoned.into_inner() = url.to_string(),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn reopen(&self) {
        self.closed.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonar_core::Log;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ingestion(base_url: &str) -> HttpIngestion {
        let config = IngestionConfig {
            log_url: base_url.to_string(),
            connect_timeout_secs: 5,
            read_timeout_secs: 1,
            retry_intervals_ms: vec![10],
        };
        HttpIngestion::new(&config).unwrap()
    }

    fn container() -> LogContainer {
        let mut log = Log::new("event").with_property("name", "click");
        log.timestamp = Some(Utc::now() - chrono::Duration::seconds(2));
        LogContainer { logs: vec![log] }
    }

    #[test]
    fn masks_all_but_last_eight() {
        assert_eq!(mask_secret("0123456789abcdef"), "********89abcdef");
        assert_eq!(mask_secret("short"), "short");
    }

    #[test]
    fn wire_form_uses_relative_offset() {
        let original = container();
        let now = original.logs[0].timestamp.unwrap() + chrono::Duration::milliseconds(1500);
        let wire = wire_container(&original, now);
        assert_eq!(wire.logs[0].toffset, Some(1500));
        assert!(wire.logs[0].timestamp.is_none());
        assert!(original.logs[0].timestamp.is_some());
    }

    #[tokio::test]
    async fn posts_batch_with_headers() {
        let server = MockServer::start().await;
        let install_id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path("/logs"))
            .and(query_param("api-version", "1.0.0"))
            .and(header("App-Secret", "secret-value"))
            .and(header("Install-ID", install_id.to_string().as_str()))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(serde_json::json!({"logs": [{"type": "event", "name": "click"}]})))
            .respond_with(ResponseTemplate::new(200).insert_header("x-ms-request", "1"))
            .expect(1)
            .mount(&server)
            .await;

        let response = ingestion(&server.uri())
            .send_logs("secret-value", install_id, &container())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("x-ms-request").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn non_success_status_becomes_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let err = ingestion(&server.uri())
            .send_logs("s", Uuid::new_v4(), &container())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(403));
        assert!(!crate::is_recoverable_error(&err));
    }

    #[tokio::test]
    async fn throttled_answer_carries_requested_back_off() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("x-ms-retry-after-ms", "1500")
                    .set_body_string("slow down"),
            )
            .mount(&server)
            .await;

        let err = ingestion(&server.uri())
            .send_logs("s", Uuid::new_v4(), &container())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(429));
        assert_eq!(err.retry_after(), Some(Duration::from_millis(1500)));
        assert!(crate::is_recoverable_error(&err));
    }

    #[test]
    fn back_off_prefers_millisecond_header() {
        let mut headers = HashMap::new();
        headers.insert("retry-after".to_string(), "2".to_string());
        assert_eq!(requested_back_off(&headers), Some(Duration::from_secs(2)));
        headers.insert(RETRY_AFTER_MS.to_string(), "250".to_string());
        assert_eq!(requested_back_off(&headers), Some(Duration::from_millis(250)));
        headers.insert(RETRY_AFTER_MS.to_string(), "soon".to_string());
        assert_eq!(requested_back_off(&headers), Some(Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn slow_server_is_a_recoverable_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let err = ingestion(&server.uri())
            .send_logs("s", Uuid::new_v4(), &container())
            .await
            .unwrap_err();
        assert!(crate::is_recoverable_error(&err), "got {err:?}");
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let err = ingestion("http://127.0.0.1:1")
            .send_logs("s", Uuid::new_v4(), &container())
            .await
            .unwrap_err();
        assert!(matches!(err, SonarError::Network { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn closed_transport_refuses_until_reopened() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let ingestion = ingestion(&server.uri());
        ingestion.close();
        assert!(matches!(
            ingestion.send_logs("s", Uuid::new_v4(), &container()).await,
            Err(SonarError::Cancelled)
        ));
        ingestion.reopen();
        ingestion
            .send_logs("s", Uuid::new_v4(), &container())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn set_log_url_redirects_sends() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/logs"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let ingestion = ingestion("http://127.0.0.1:1");
        ingestion.set_log_url(&format!("{}/", server.uri()));
        ingestion
            .send_logs("s", Uuid::new_v4(), &container())
            .await
            .unwrap();
    }
}
