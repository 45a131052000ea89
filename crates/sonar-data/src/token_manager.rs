// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Partition token caching and resolution.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use sonar_core::{SonarError, TokenExchange, TokenResult};
use sonar_storage::TokenCache;

use crate::partition::{remove_account_id, READONLY};

/// Caches partition tokens and fetches fresh ones through a [`TokenExchange`].
#[derive(Clone)]
pub struct TokenManager {
    cache: TokenCache,
    exchange: Arc<dyn TokenExchange>,
}

impl TokenManager {
    pub fn new(cache: TokenCache, exchange: Arc<dyn TokenExchange>) -> Self {
        Self { cache, exchange }
    }

    pub fn exchange(&self) -> &Arc<dyn TokenExchange> {
        &self.exchange
    }

    /// Cached token for `partition`.
    ///
    /// Unreadable, invalid and (unless `include_expired`) expired entries are
    /// reported as absent.
    pub async fn get_cached_token(
        &self,
        partition: &str,
        include_expired: bool,
    ) -> Option<TokenResult> {
        let raw = match self.cache.get(partition).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(partition, error = %e, "failed to read cached token");
                return None;
            }
        };
        let token: TokenResult = match serde_json::from_str(&raw) {
            Ok(token) => token,
            Err(e) => {
                warn!(partition, error = %e, "failed to parse cached token");
                return None;
            }
        };
        if !include_expired && token.is_expired_at(Utc::now()) {
            debug!(partition, expires_on = %token.expires_on, "cached token expired");
            return None;
        }
        if !token.is_valid() {
            warn!(partition, "cached token is missing addressing fields");
            return None;
        }
        Some(token)
    }

    /// Store `token` under its partition name without the account suffix.
    pub async fn set_cached_token(&self, token: &TokenResult) -> Result<(), SonarError> {
        let raw = serde_json::to_string(token)
            .map_err(|e| SonarError::serialization("failed to serialize token", e))?;
        self.cache
            .set(remove_account_id(&token.partition), &raw)
            .await
    }

    /// Forget every user token. The readonly token stays valid across users.
    pub async fn remove_all_cached_tokens(&self) -> Result<(), SonarError> {
        let removed = self.cache.remove_all_except(READONLY).await?;
        debug!(removed, "cached user tokens removed");
        Ok(())
    }

    /// A usable token for `partition`: the cached one while it is fresh,
    /// otherwise a new one from the exchange, which is then cached.
    pub async fn resolve(&self, partition: &str) -> Result<TokenResult, SonarError> {
        if let Some(token) = self.get_cached_token(partition, false).await {
            return Ok(token);
        }
        let token = self
            .exchange
            .get_token(partition)
            .await
            .map_err(|e| match e {
                SonarError::Token { .. } | SonarError::Cancelled => e,
                other => SonarError::Token {
                    message: format!("failed to get token for partition '{partition}'"),
                    source: Some(Box::new(other)),
                },
            })?;
        if !token.is_valid() {
            return Err(SonarError::Token {
                message: format!("token exchange returned an invalid token for '{partition}'"),
                source: None,
            });
        }
        if let Err(e) = self.set_cached_token(&token).await {
            warn!(partition, error = %e, "failed to cache token");
        }
        Ok(token)
    }
}
