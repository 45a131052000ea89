// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the Sonar telemetry SDK.
//!
//! TOML files are looked up in the usual system, user and working-directory
//! locations, `SONAR_*` environment variables override them, and failures are
//! reported as miette diagnostics with typo suggestions.
//!
//! ```no_run
//! let config = sonar_config::load_and_validate().expect("config errors");
//! println!("ingestion: {}", config.ingestion.log_url);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

pub use diagnostic::{ConfigError, render_errors};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::{
    ChannelConfig, DataConfig, GroupSettings, IngestionConfig, SdkConfig, SonarConfig,
    StorageConfig,
};

/// Load the layered configuration and validate it.
pub fn load_and_validate() -> Result<SonarConfig, Vec<ConfigError>> {
    match loader::load_config() {
        Ok(config) => validation::validate_config(&config).map(|()| config),
        Err(err) => Err(diagnostic::figment_to_config_errors(
            err,
            &loader::collect_toml_sources(),
        )),
    }
}

/// Load a configuration from a TOML string and validate it.
pub fn load_and_validate_str(toml_content: &str) -> Result<SonarConfig, Vec<ConfigError>> {
    match loader::load_config_from_str(toml_content) {
        Ok(config) => validation::validate_config(&config).map(|()| config),
        Err(err) => {
            let sources = [("<inline>".to_string(), toml_content.to_string())];
            Err(diagnostic::figment_to_config_errors(err, &sources))
        }
    }
}

/// Load one explicit file (plus env overrides) and validate it.
pub fn load_and_validate_path(path: &std::path::Path) -> Result<SonarConfig, Vec<ConfigError>> {
    match loader::load_config_from_path(path) {
        Ok(config) => validation::validate_config(&config).map(|()| config),
        Err(err) => {
            let sources: Vec<_> = std::fs::read_to_string(path)
                .map(|content| vec![(path.display().to_string(), content)])
                .unwrap_or_default();
            Err(diagnostic::figment_to_config_errors(err, &sources))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_surface_from_str() {
        let errors = load_and_validate_str("[[groups]]\nname = \"a\"\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(&errors[0], ConfigError::Validation { message } if message.contains("batch_size")));
    }

    #[test]
    fn wrong_type_is_reported() {
        let errors = load_and_validate_str("[channel]\nclear_batch_size = \"many\"\n").unwrap_err();
        assert!(matches!(&errors[0], ConfigError::InvalidType { key, .. } if key == "channel.clear_batch_size"));
    }

    #[test]
    fn valid_str_loads() {
        let config = load_and_validate_str(
            "[sdk]\napp_secret = \"s\"\n\n[[groups]]\nname = \"analytics\"\n",
        )
        .unwrap();
        assert_eq!(config.groups[0].name, "analytics");
    }
}
