// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Lookup order: `./sonar.toml` > `~/.config/sonar/sonar.toml` > `/etc/sonar/sonar.toml`,
//! with `SONAR_*` environment variables applied last.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::SonarConfig;

const SYSTEM_CONFIG: &str = "/etc/sonar/sonar.toml";
const LOCAL_CONFIG: &str = "sonar.toml";

/// Sections addressable from the environment. Each `SONAR_<SECTION>_<KEY>`
/// variable maps to `<section>.<key>`.
const ENV_SECTIONS: &[&str] = &["sdk", "ingestion", "channel", "storage", "data"];

/// Path of the per-user configuration file, if the platform has a config dir.
pub fn user_config_path() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|d| d.join("sonar").join("sonar.toml"))
}

/// Load configuration from the standard hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/sonar/sonar.toml`
/// 3. `~/.config/sonar/sonar.toml`
/// 4. `./sonar.toml`
/// 5. `SONAR_*` environment variables
pub fn load_config() -> Result<SonarConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no file lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<SonarConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(SonarConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from one file with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<SonarConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(SonarConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// The Figment used by [`load_config`], before extraction.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(SonarConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG))
        .merge(env_provider())
}

/// Environment provider with explicit section mapping.
///
/// `Env::split("_")` would turn `SONAR_SDK_APP_SECRET` into `sdk.app.secret`;
/// only the first segment names the section.
fn env_provider() -> Env {
    Env::prefixed("SONAR_").map(|key| env_key_to_path(key.as_str()).into())
}

fn env_key_to_path(key: &str) -> String {
    for section in ENV_SECTIONS {
        if let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

/// Paths of every config file that exists, with their content, for diagnostics.
pub(crate) fn collect_toml_sources() -> Vec<(String, String)> {
    let mut candidates = vec![std::env::current_dir()
        .map(|d| d.join(LOCAL_CONFIG))
        .unwrap_or_else(|_| LOCAL_CONFIG.into())];
    candidates.extend(user_config_path());
    candidates.push(SYSTEM_CONFIG.into());

    candidates
        .into_iter()
        .filter_map(|path| {
            std::fs::read_to_string(&path)
                .ok()
                .map(|content| (path.display().to_string(), content))
        })
        .collect()
}
