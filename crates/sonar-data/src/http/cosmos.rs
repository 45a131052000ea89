// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the remote document database.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response};
use tracing::debug;
use url::form_urlencoded::byte_serialize;

use sonar_core::{DocumentRemote, RemotePage, SonarError, TokenResult};

const API_VERSION: &str = "2018-06-18";
const PARTITION_KEY: &str = "x-ms-documentdb-partitionkey";
const VERSION: &str = "x-ms-version";
const DATE: &str = "x-ms-date";
const UPSERT: &str = "x-ms-documentdb-is-upsert";
const CONTINUATION: &str = "x-ms-continuation";

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

fn missing(field: &str) -> SonarError {
    SonarError::Token {
        message: format!("token is missing {field}"),
        source: None,
    }
}

/// Talks to the document database with partition resource tokens.
#[derive(Debug, Clone)]
pub struct HttpDocumentClient {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl HttpDocumentClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: None,
        }
    }

    /// Send every call to `endpoint` instead of the account host.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    fn docs_url(&self, token: &TokenResult, document_id: Option<&str>) -> Result<String, SonarError> {
        let account = token.db_account.as_deref().ok_or_else(|| missing("dbAccount"))?;
        let db = token.db_name.as_deref().ok_or_else(|| missing("dbName"))?;
        let collection = token
            .db_collection_name
            .as_deref()
            .ok_or_else(|| missing("dbCollectionName"))?;
        let base = match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{account}.documents.azure.com"),
        };
        let mut url = format!("{base}/dbs/{}/colls/{}/docs", encode(db), encode(collection));
        if let Some(id) = document_id {
            url.push('/');
            url.push_str(&encode(id));
        }
        Ok(url)
    }

    fn request(
        &self,
        method: Method,
        token: &TokenResult,
        document_id: Option<&str>,
    ) -> Result<RequestBuilder, SonarError> {
        let url = self.docs_url(token, document_id)?;
        let secret = token.token.as_deref().ok_or_else(|| missing("token"))?;
        let date = Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string()
            .to_lowercase();
        debug!(%method, url = %url, partition = %token.partition, "calling document service");
        Ok(self
            .client
            .request(method, url)
            .header(PARTITION_KEY, format!("[\"{}\"]", token.partition))
            .header(VERSION, API_VERSION)
            .header(DATE, date)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, encode(secret)))
    }

    async fn send(request: RequestBuilder) -> Result<Response, SonarError> {
        let response = request.send().await.map_err(|e| SonarError::Network {
            message: format!("document request failed: {e}"),
            source: Some(Box::new(e)),
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SonarError::Http {
            status: status.as_u16(),
            body,
        })
    }

    async fn body(response: Response) -> Result<String, SonarError> {
        response.text().await.map_err(|e| SonarError::Network {
            message: format!("failed to read document response: {e}"),
            source: Some(Box::new(e)),
        })
    }
}

#[async_trait]
impl DocumentRemote for HttpDocumentClient {
    async fn read(&self, token: &TokenResult, document_id: &str) -> Result<String, SonarError> {
        let response = Self::send(self.request(Method::GET, token, Some(document_id))?).await?;
        Self::body(response).await
    }

    async fn create_or_replace(
        &self,
        token: &TokenResult,
        payload: &str,
        upsert: bool,
    ) -> Result<String, SonarError> {
        let mut request = self
            .request(Method::POST, token, None)?
            .body(payload.to_string());
        if upsert {
            request = request.header(UPSERT, "true");
        }
        let response = Self::send(request).await?;
        Self::body(response).await
    }

    async fn delete(&self, token: &TokenResult, document_id: &str) -> Result<(), SonarError> {
        Self::send(self.request(Method::DELETE, token, Some(document_id))?).await?;
        Ok(())
    }

    async fn list(
        &self,
        token: &TokenResult,
        continuation_token: Option<&str>,
    ) -> Result<RemotePage, SonarError> {
        let mut request = self.request(Method::GET, token, None)?;
        if let Some(continuation) = continuation_token {
            request = request.header(CONTINUATION, continuation);
        }
        let response = Self::send(request).await?;
        let continuation_token = response
            .headers()
            .get(CONTINUATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        Ok(RemotePage {
            payload: Self::body(response).await?,
            continuation_token,
        })
    }
}
