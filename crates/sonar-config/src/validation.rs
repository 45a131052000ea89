// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic checks that serde attributes cannot express.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::{SonarConfig, MIN_STORAGE_BYTES};

/// Validate a deserialized configuration.
///
/// Collects every problem instead of stopping at the first one.
pub fn validate_config(config: &SonarConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if let Some(install_id) = &config.sdk.install_id
        && uuid::Uuid::parse_str(install_id).is_err()
    {
        fail(format!("sdk.install_id `{install_id}` is not a valid UUID"));
    }

    if !matches!(
        config.sdk.log_level.as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        fail(format!(
            "sdk.log_level must be one of trace, debug, info, warn, error; got `{}`",
            config.sdk.log_level
        ));
    }

    check_url(&mut fail, "ingestion.log_url", &config.ingestion.log_url);
    check_url(
        &mut fail,
        "data.token_exchange_url",
        &config.data.token_exchange_url,
    );

    if config.channel.clear_batch_size < 1 {
        fail("channel.clear_batch_size must be at least 1".to_string());
    }
    if config.channel.command_buffer < 1 {
        fail("channel.command_buffer must be at least 1".to_string());
    }

    let mut seen = HashSet::new();
    for (i, group) in config.groups.iter().enumerate() {
        if group.name.trim().is_empty() {
            fail(format!("groups[{i}].name must not be empty"));
        } else if !seen.insert(group.name.as_str()) {
            fail(format!("duplicate group name `{}` in [[groups]]", group.name));
        }
        if group.batch_size < 1 {
            fail(format!("groups[{i}].batch_size must be at least 1"));
        }
        if group.max_parallel_batches < 1 {
            fail(format!("groups[{i}].max_parallel_batches must be at least 1"));
        }
    }

    if config.ingestion.retry_intervals_ms.contains(&0) {
        fail("ingestion.retry_intervals_ms entries must be positive".to_string());
    }

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }
    if config.storage.max_storage_bytes < MIN_STORAGE_BYTES {
        fail(format!(
            "storage.max_storage_bytes must be at least {MIN_STORAGE_BYTES}, got {}",
            config.storage.max_storage_bytes
        ));
    }
    if config.data.database_path.trim().is_empty() {
        fail("data.database_path must not be empty".to_string());
    }
    if config.data.document_ttl_secs < -1 {
        fail(format!(
            "data.document_ttl_secs must be -1 (infinite), 0 (no cache) or positive, got {}",
            config.data.document_ttl_secs
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(fail: &mut impl FnMut(String), key: &str, value: &str) {
    match url::Url::parse(value) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
        Ok(parsed) => fail(format!(
            "{key} must use http or https, got scheme `{}`",
            parsed.scheme()
        )),
        Err(e) => fail(format!("{key} `{value}` is not a valid URL: {e}")),
    }
}
