// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `sonar` - diagnostics for the Sonar telemetry SDK's on-device state.
//!
//! Reads the same configuration and databases the SDK uses, so an operator
//! can check a config file, see how many logs are waiting to be sent and
//! which document operations are still queued.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::json;
use sonar::telemetry::init_tracing;
use sonar_config::SonarConfig;
use sonar_core::{LogStore, PluginAdapter, SonarError};
use sonar_storage::{open_log_store, user_table_name, DocumentCache, LocalDocument, READONLY_TABLE};

/// Sonar telemetry SDK diagnostics.
#[derive(Parser, Debug)]
#[command(name = "sonar", version, about, long_about = None)]
struct Cli {
    /// Read this configuration file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect the configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Inspect persisted logs.
    Logs {
        #[command(subcommand)]
        action: LogsAction,
    },
    /// Inspect the offline document cache.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Validate the configuration and report every problem found.
    Check,
    /// Print the effective configuration as TOML.
    Show,
}

#[derive(Subcommand, Debug)]
enum LogsAction {
    /// Number of logs of a group waiting to be sent.
    Count { group: String },
}

#[derive(Subcommand, Debug)]
enum DocsAction {
    /// List document operations not yet synced.
    Pending {
        /// Also list the signed-in user's queued operations.
        #[arg(long)]
        account: Option<String>,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Option<SonarConfig> {
    let loaded = match path {
        Some(path) => sonar_config::load_and_validate_path(path),
        None => sonar_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => Some(config),
        Err(errors) => {
            sonar_config::render_errors(&errors);
            None
        }
    }
}

async fn count_logs(config: &SonarConfig, group: &str) -> Result<(), SonarError> {
    let store = open_log_store(&config.storage).await;
    let count = store.count(group).await?;
    println!("{group}: {count} log(s) waiting");
    store.shutdown().await
}

fn pending_row(doc: &LocalDocument) -> serde_json::Value {
    json!({
        "table": doc.table,
        "partition": doc.partition,
        "id": doc.document_id,
        "operation": doc.pending_operation.map(|op| op.to_string()),
        "etag": doc.etag,
        "expired": doc.is_expired(),
    })
}

async fn pending_documents(
    config: &SonarConfig,
    account: Option<&str>,
    as_json: bool,
) -> Result<(), SonarError> {
    let cache = DocumentCache::open(&config.data.database_path, config.storage.wal_mode).await?;
    let mut tables = vec![READONLY_TABLE.to_string()];
    if let Some(account) = account {
        tables.push(user_table_name(account));
    }

    let mut rows = Vec::new();
    for table in &tables {
        rows.extend(cache.pending_operations(table).await?);
    }

    if as_json {
        let rows: Vec<_> = rows.iter().map(pending_row).collect();
        let rendered = serde_json::to_string_pretty(&rows)
            .map_err(|e| SonarError::serialization("failed to render pending operations", e))?;
        println!("{rendered}");
        return Ok(());
    }
    if rows.is_empty() {
        println!("no pending document operations");
        return Ok(());
    }
    for doc in &rows {
        let operation = doc
            .pending_operation
            .map(|op| op.to_string())
            .unwrap_or_default();
        println!("{:<8} {:<24} {}", operation, doc.partition, doc.document_id);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(config) = load_config(cli.config.as_ref()) else {
        return ExitCode::FAILURE;
    };
    init_tracing(&config.sdk.log_level);

    let result = match cli.command {
        Commands::Config {
            action: ConfigAction::Check,
        } => {
            println!(
                "configuration is valid ({} group(s), data {})",
                config.groups.len(),
                if config.data.enabled { "enabled" } else { "disabled" }
            );
            Ok(())
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => toml::to_string_pretty(&config)
            .map(|rendered| print!("{rendered}"))
            .map_err(|e| SonarError::Config(format!("failed to render configuration: {e}"))),
        Commands::Logs {
            action: LogsAction::Count { group },
        } => count_logs(&config, &group).await,
        Commands::Docs {
            action: DocsAction::Pending { account, json },
        } => pending_documents(&config, account.as_deref(), json).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sonar: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_nested_commands() {
        let cli = Cli::parse_from(["sonar", "logs", "count", "group_analytics"]);
        assert!(matches!(
            cli.command,
            Commands::Logs { action: LogsAction::Count { ref group } } if group == "group_analytics"
        ));

        let cli = Cli::parse_from(["sonar", "--config", "x.toml", "docs", "pending", "--json"]);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(
            cli.command,
            Commands::Docs { action: DocsAction::Pending { json: true, account: None } }
        ));
    }

    #[test]
    fn defaults_load_without_a_file() {
        let config = sonar_config::load_and_validate_str("").unwrap();
        assert!(config.data.enabled);
    }
}
