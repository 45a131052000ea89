// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the partition token exchange service.

use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sonar_core::{SonarError, TokenExchange, TokenResult};

const TOKENS_PATH: &str = "/data/tokens";
const APP_SECRET: &str = "App-Secret";
const SUCCEED: &str = "Succeed";

#[derive(Serialize)]
struct TokenRequest<'a> {
    partitions: [&'a str; 1],
}

#[derive(Deserialize)]
struct TokensResponse {
    #[serde(default)]
    tokens: Vec<TokenResult>,
}

fn token_error(message: impl Into<String>) -> SonarError {
    SonarError::Token {
        message: message.into(),
        source: None,
    }
}

/// Exchanges the app secret (and the signed-in user's token, when set) for
/// partition resource tokens.
#[derive(Debug)]
pub struct HttpTokenExchange {
    client: reqwest::Client,
    url: RwLock<String>,
    app_secret: String,
    auth_token: RwLock<Option<String>>,
}

impl HttpTokenExchange {
    pub fn new(client: reqwest::Client, url: &str, app_secret: &str) -> Self {
        Self {
            client,
            url: RwLock::new(url.to_string()),
            app_secret: app_secret.to_string(),
            auth_token: RwLock::new(None),
        }
    }

    /// Token of the signed-in user, sent as a bearer credential.
    pub fn set_auth_token(&self, token: Option<&str>) {
        let mut guard = self
            .auth_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = token.map(String::from);
    }

    fn endpoint(&self) -> String {
        let base = self
            .url
            .read()
            .map(|url| url.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());
        format!("{}{TOKENS_PATH}", base.trim_end_matches('/'))
    }

    fn bearer(&self) -> Option<String> {
        self.auth_token
            .read()
            .map(|token| token.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

/// The single successful token in an exchange answer.
fn select_token(body: &str) -> Result<TokenResult, SonarError> {
    let response: TokensResponse = serde_json::from_str(body).map_err(|e| SonarError::Token {
        message: "failed to parse token exchange response".to_string(),
        source: Some(Box::new(e)),
    })?;
    let [token] = <[TokenResult; 1]>::try_from(response.tokens).map_err(|tokens| {
        token_error(format!(
            "token exchange returned {} tokens, expected exactly one",
            tokens.len()
        ))
    })?;
    let succeeded = token
        .status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case(SUCCEED));
    if !succeeded {
        return Err(token_error(format!(
            "token exchange for '{}' did not succeed (status {:?})",
            token.partition, token.status
        )));
    }
    if !token.is_valid() {
        return Err(token_error(format!(
            "token exchange returned an incomplete token for '{}'",
            token.partition
        )));
    }
    Ok(token)
}

#[async_trait]
impl TokenExchange for HttpTokenExchange {
    async fn get_token(&self, partition: &str) -> Result<TokenResult, SonarError> {
        let endpoint = self.endpoint();
        debug!(partition, url = %endpoint, "exchanging partition token");
        let mut request = self
            .client
            .post(&endpoint)
            .header(APP_SECRET, &self.app_secret)
            .header(CONTENT_TYPE, "application/json")
            .json(&TokenRequest {
                partitions: [partition],
            });
        if let Some(bearer) = self.bearer() {
            request = request.bearer_auth(bearer);
        }
        let response = request.send().await.map_err(|e| SonarError::Network {
            message: format!("token exchange request failed: {e}"),
            source: Some(Box::new(e)),
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| SonarError::Network {
            message: format!("failed to read token exchange response: {e}"),
            source: Some(Box::new(e)),
        })?;
        if !status.is_success() {
            return Err(SonarError::Http {
                status: status.as_u16(),
                body,
            });
        }
        select_token(&body)
    }

    fn set_base_url(&self, url: &str) {
        let mut guard = self
            .url
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = url.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token_json(status: &str) -> serde_json::Value {
        json!({
            "partition": "readonly",
            "dbAccount": "account",
            "dbName": "db",
            "dbCollectionName": "collection",
            "token": "resource-token",
            "status": status,
            "expiresOn": "2099-01-01T00:00:00Z"
        })
    }

    #[tokio::test]
    async fn posts_partition_with_secret_and_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v0.1/data/tokens"))
            .and(header("App-Secret", "app-secret"))
            .and(header("Authorization", "Bearer user-token"))
            .and(body_json(json!({"partitions": ["readonly"]})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"tokens": [token_json("succeed")]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let exchange = HttpTokenExchange::new(reqwest::Client::new(), "http://unused", "app-secret");
        exchange.set_base_url(&format!("{}/v0.1/", server.uri()));
        exchange.set_auth_token(Some("user-token"));
        let token = exchange.get_token("readonly").await.unwrap();
        assert_eq!(token.token.as_deref(), Some("resource-token"));
    }

    #[tokio::test]
    async fn non_success_status_is_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("denied"))
            .mount(&server)
            .await;
        let exchange = HttpTokenExchange::new(reqwest::Client::new(), &server.uri(), "s");
        let err = exchange.get_token("readonly").await.unwrap_err();
        assert_eq!(err.http_status(), Some(401));
    }

    #[test]
    fn selects_exactly_one_successful_token() {
        assert!(select_token(&json!({"tokens": [token_json("Succeed")]}).to_string()).is_ok());
        assert!(select_token(&json!({"tokens": [token_json("Failed")]}).to_string()).is_err());
        assert!(select_token(&json!({"tokens": []}).to_string()).is_err());
        assert!(select_token(
            &json!({"tokens": [token_json("Succeed"), token_json("Succeed")]}).to_string()
        )
        .is_err());
        assert!(matches!(
            select_token("not json"),
            Err(SonarError::Token { .. })
        ));
    }
}
