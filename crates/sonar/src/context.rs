// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The application context: one value owning every SDK component.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use sonar_channel::{Channel, ChannelDeps, ChannelSettings, GroupConfig};
use sonar_config::SonarConfig;
use sonar_core::{
    DeviceInfoProvider, DocumentRemote, HealthStatus, IngestionAdapter, Log, LogStore,
    NetworkStateProvider, PluginAdapter, SonarError, TokenExchange,
};
use sonar_data::{open_data_store, DataDeps, DataSettings, DataStore};
use sonar_ingestion::{HttpIngestion, RetryPolicy, RetryingIngestion};
use sonar_storage::{open_log_store, DocumentCache};
use tracing::{info, warn};
use uuid::Uuid;

use crate::providers::{HostDevice, StaticNetwork};
use crate::registry::{Service, ServiceId, ServiceRegistry};

/// Assembles an [`AppContext`].
///
/// Every collaborator defaults to the production implementation derived from
/// the configuration; hosts and tests replace the ones they provide.
pub struct AppContextBuilder {
    config: SonarConfig,
    registry: ServiceRegistry,
    services: Vec<ServiceId>,
    device: Option<Arc<dyn DeviceInfoProvider>>,
    network: Option<Arc<dyn NetworkStateProvider>>,
    ingestion: Option<Arc<dyn IngestionAdapter>>,
    log_store: Option<Arc<dyn LogStore>>,
    documents: Option<(Arc<dyn DocumentRemote>, Arc<dyn TokenExchange>)>,
}

impl AppContextBuilder {
    fn new(config: SonarConfig) -> Self {
        let registry = ServiceRegistry::builtin();
        let services = registry.ids();
        Self {
            config,
            registry,
            services,
            device: None,
            network: None,
            ingestion: None,
            log_store: None,
            documents: None,
        }
    }

    pub fn with_registry(mut self, registry: ServiceRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Services started by [`AppContext::start`], in order. Defaults to all
    /// built-in services.
    pub fn with_services(mut self, services: Vec<ServiceId>) -> Self {
        self.services = services;
        self
    }

    pub fn with_device(mut self, device: Arc<dyn DeviceInfoProvider>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_network(mut self, network: Arc<dyn NetworkStateProvider>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_ingestion(mut self, ingestion: Arc<dyn IngestionAdapter>) -> Self {
        self.ingestion = Some(ingestion);
        self
    }

    pub fn with_log_store(mut self, store: Arc<dyn LogStore>) -> Self {
        self.log_store = Some(store);
        self
    }

    /// Talk to this document service instead of the HTTPS clients.
    pub fn with_document_backend(
        mut self,
        remote: Arc<dyn DocumentRemote>,
        exchange: Arc<dyn TokenExchange>,
    ) -> Self {
        self.documents = Some((remote, exchange));
        self
    }

    /// Open the stores and start the channel and document store.
    pub async fn build(self) -> Result<AppContext, SonarError> {
        let config = self.config;
        let install_id = match config.sdk.install_id.as_deref() {
            Some(id) => Uuid::parse_str(id)
                .map_err(|e| SonarError::Config(format!("invalid install id '{id}': {e}")))?,
            None => Uuid::new_v4(),
        };

        let log_store = match self.log_store {
            Some(store) => store,
            None => open_log_store(&config.storage).await,
        };
        let ingestion: Arc<dyn IngestionAdapter> = match self.ingestion {
            Some(ingestion) => ingestion,
            None => Arc::new(RetryingIngestion::new(
                HttpIngestion::new(&config.ingestion)?,
                RetryPolicy::from_config(&config.ingestion),
            )),
        };
        let device = self
            .device
            .unwrap_or_else(|| Arc::new(HostDevice::default()));
        let network = self
            .network
            .unwrap_or_else(|| Arc::new(StaticNetwork::default()));

        let channel = Channel::start(
            ChannelDeps {
                store: log_store.clone(),
                ingestion: ingestion.clone(),
                device,
            },
            ChannelSettings::from_config(&config, install_id),
        );

        let data = match self.documents {
            Some((remote, exchange)) => {
                let cache =
                    DocumentCache::open(&config.data.database_path, config.storage.wal_mode).await?;
                DataStore::start(
                    DataDeps {
                        cache,
                        remote,
                        exchange,
                        network: network.clone(),
                    },
                    DataSettings::from_config(&config),
                )
                .await
            }
            None => open_data_store(&config, network.clone()).await?,
        };

        info!(
            %install_id,
            log_store = %log_store.describe(),
            ingestion = %ingestion.describe(),
            "application context built"
        );
        Ok(AppContext {
            config,
            install_id,
            channel,
            log_store,
            ingestion,
            network,
            data,
            registry: self.registry,
            requested: self.services,
            services: Vec::new(),
            started: false,
        })
    }
}

/// Every SDK component, owned in one place.
pub struct AppContext {
    config: SonarConfig,
    install_id: Uuid,
    channel: Channel,
    log_store: Arc<dyn LogStore>,
    ingestion: Arc<dyn IngestionAdapter>,
    network: Arc<dyn NetworkStateProvider>,
    data: DataStore,
    registry: ServiceRegistry,
    requested: Vec<ServiceId>,
    services: Vec<(ServiceId, Box<dyn Service>)>,
    started: bool,
}

impl AppContext {
    pub fn builder(config: SonarConfig) -> AppContextBuilder {
        AppContextBuilder::new(config)
    }

    pub fn config(&self) -> &SonarConfig {
        &self.config
    }

    pub fn install_id(&self) -> Uuid {
        self.install_id
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn data(&self) -> &DataStore {
        &self.data
    }

    pub fn log_store(&self) -> &Arc<dyn LogStore> {
        &self.log_store
    }

    pub fn network(&self) -> &Arc<dyn NetworkStateProvider> {
        &self.network
    }

    /// Thresholds configured for `group`, if the configuration names it.
    pub fn group_settings(&self, group: &str) -> Option<GroupConfig> {
        self.config
            .groups
            .iter()
            .find(|g| g.name == group)
            .map(GroupConfig::from)
    }

    /// Identifiers of the started services, in start order.
    pub fn started_services(&self) -> Vec<ServiceId> {
        self.services.iter().map(|(id, _)| *id).collect()
    }

    /// Construct the requested services, register every log group and run
    /// each service's start hook. Calling it again does nothing.
    pub async fn start(&mut self) -> Result<(), SonarError> {
        if self.started {
            return Ok(());
        }
        let mut services = Vec::with_capacity(self.requested.len());
        for id in &self.requested {
            services.push((*id, self.registry.construct(*id, self)?));
        }

        let mut registered = HashSet::new();
        for (_, service) in &services {
            if let Some(group) = service.group() {
                registered.insert(group.name.clone());
                self.channel.add_group(group, None).await?;
            }
        }
        for settings in &self.config.groups {
            if registered.insert(settings.name.clone()) {
                self.channel.add_group(GroupConfig::from(settings), None).await?;
            }
        }

        for (_, service) in &services {
            service.on_started(self).await?;
        }
        info!(services = services.len(), groups = registered.len(), "application context started");
        self.services = services;
        self.started = true;
        Ok(())
    }

    /// Enqueue `log` on the group of a started service.
    pub async fn track(&self, service: ServiceId, log: Log) -> Result<(), SonarError> {
        let (_, found) = self
            .services
            .iter()
            .find(|(id, _)| *id == service)
            .ok_or_else(|| SonarError::AdapterNotFound {
                adapter_type: "service".into(),
                name: service.to_string(),
            })?;
        let group = found.group().ok_or_else(|| {
            SonarError::InvalidArgument(format!("service {service} does not send logs"))
        })?;
        self.channel.enqueue(log, &group.name).await
    }

    /// Enable or disable log sending and the document store together.
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), SonarError> {
        self.channel.set_enabled(enabled).await?;
        self.data.set_enabled(enabled).await;
        Ok(())
    }

    /// Health of the log store and the ingestion transport.
    pub async fn health(&self) -> Vec<(String, HealthStatus)> {
        let names = [self.log_store.name().to_string(), self.ingestion.name().to_string()];
        let checks = join_all([self.log_store.health_check(), self.ingestion.health_check()]).await;
        names
            .into_iter()
            .zip(checks)
            .map(|(name, result)| {
                let status = result.unwrap_or_else(|e| HealthStatus::Unhealthy(e.to_string()));
                (name, status)
            })
            .collect()
    }

    /// Stop the channel (keeping unsent logs), the document store and the
    /// adapters. Every step runs; the first failure is returned.
    pub async fn shutdown(&self) -> Result<(), SonarError> {
        let mut first_error = None;
        if let Err(e) = self.channel.shutdown().await {
            warn!(error = %e, "channel shutdown failed");
            first_error.get_or_insert(e);
        }
        self.data.shutdown().await;
        if let Err(e) = self.ingestion.shutdown().await {
            warn!(error = %e, "ingestion shutdown failed");
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.log_store.shutdown().await {
            warn!(error = %e, "log store shutdown failed");
            first_error.get_or_insert(e);
        }
        info!("application context shut down");
        first_error.map_or(Ok(()), Err)
    }
}
