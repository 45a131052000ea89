// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set: `level` for Sonar crates,
/// warnings for everything else.
pub fn default_filter(log_level: &str) -> String {
    format!("sonar={log_level},sonar_core={log_level},sonar_storage={log_level},sonar_ingestion={log_level},sonar_channel={log_level},sonar_data={log_level},warn")
}

/// Install the global fmt subscriber. `RUST_LOG` wins over `log_level`.
///
/// Does nothing when a subscriber is already installed.
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .try_init();
}
