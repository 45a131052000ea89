// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Sonar telemetry SDK.
//!
//! This crate provides the error type, the shared data types and the trait
//! seams (log store, ingestion transport, network state, device info, remote
//! documents) that the channel and data crates are written against.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::SonarError;
pub use types::{
    AdapterType, Device, HealthStatus, IngestionResponse, Log, LogBatch, LogContainer,
    Priority, RemotePage, TokenResult,
};

pub use traits::{
    DeviceInfoProvider, DocumentRemote, IngestionAdapter, LogStore, NetworkStateProvider,
    PluginAdapter, TokenExchange,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sonar_error_variants_construct() {
        let _config = SonarError::Config("test".into());
        let _storage = SonarError::Storage {
            source: Box::new(std::io::Error::other("test")),
        };
        let _network = SonarError::Network {
            message: "test".into(),
            source: None,
        };
        let _not_found = SonarError::AdapterNotFound {
            adapter_type: "LogStore".into(),
            name: "test".into(),
        };
        let _timeout = SonarError::Timeout {
            duration: std::time::Duration::from_secs(30),
        };
        let _internal = SonarError::Internal("test".into());
    }

    #[test]
    fn all_trait_modules_are_exported() {
        fn _assert_plugin_adapter<T: PluginAdapter>() {}
        fn _assert_log_store<T: LogStore>() {}
        fn _assert_ingestion<T: IngestionAdapter>() {}
        fn _assert_network<T: NetworkStateProvider>() {}
        fn _assert_device<T: DeviceInfoProvider>() {}
        fn _assert_remote<T: DocumentRemote>() {}
        fn _assert_token_exchange<T: TokenExchange>() {}
    }

    struct Sample;

    #[async_trait::async_trait]
    impl PluginAdapter for Sample {
        fn name(&self) -> &str {
            "sample"
        }

        fn version(&self) -> semver::Version {
            semver::Version::new(1, 2, 3)
        }

        fn adapter_type(&self) -> AdapterType {
            AdapterType::LogStore
        }

        async fn health_check(&self) -> Result<HealthStatus, SonarError> {
            Ok(HealthStatus::Healthy)
        }

        async fn shutdown(&self) -> Result<(), SonarError> {
            Ok(())
        }
    }

    #[test]
    fn adapters_describe_themselves() {
        assert_eq!(Sample.describe(), "sample v1.2.3 (LogStore)");
    }
}
