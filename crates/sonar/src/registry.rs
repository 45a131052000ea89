// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Compile-time service registry.
//!
//! Each SDK feature (analytics, crash reporting, documents) is a [`Service`]
//! constructed by a plain function from the [`AppContext`]. The registry maps
//! [`ServiceId`] to that function; nothing is discovered at runtime.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sonar_channel::GroupConfig;
use sonar_core::SonarError;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};
use tracing::info;

use crate::context::AppContext;

/// Identifier of a built-in service.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter, AsRefStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ServiceId {
    Analytics,
    Crashes,
    Data,
}

/// A feature started on top of the application context.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    /// Log group this service sends through, if any. Registered on start.
    fn group(&self) -> Option<GroupConfig> {
        None
    }

    /// Called once every service's group is registered.
    async fn on_started(&self, _ctx: &AppContext) -> Result<(), SonarError> {
        Ok(())
    }
}

pub type ServiceConstructor = fn(&AppContext) -> Box<dyn Service>;

/// Map of service identifiers to their constructors.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    constructors: HashMap<ServiceId, ServiceConstructor>,
}

impl ServiceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in service.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for id in ServiceId::iter() {
            let constructor: ServiceConstructor = match id {
                ServiceId::Analytics => analytics,
                ServiceId::Crashes => crashes,
                ServiceId::Data => data,
            };
            registry.register(id, constructor);
        }
        registry
    }

    /// Register (or replace) the constructor for `id`.
    pub fn register(&mut self, id: ServiceId, constructor: ServiceConstructor) {
        self.constructors.insert(id, constructor);
    }

    pub fn contains(&self, id: ServiceId) -> bool {
        self.constructors.contains_key(&id)
    }

    /// Registered identifiers, in declaration order.
    pub fn ids(&self) -> Vec<ServiceId> {
        let mut ids: Vec<ServiceId> = self.constructors.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn construct(&self, id: ServiceId, ctx: &AppContext) -> Result<Box<dyn Service>, SonarError> {
        let constructor = self
            .constructors
            .get(&id)
            .ok_or_else(|| SonarError::AdapterNotFound {
                adapter_type: "service".into(),
                name: id.to_string(),
            })?;
        Ok(constructor(ctx))
    }
}

/// Group name used by the analytics service.
pub const ANALYTICS_GROUP: &str = "group_analytics";

/// Group name used by the crash reporting service.
pub const ERRORS_GROUP: &str = "groupErrors";

struct GroupService {
    name: &'static str,
    group: GroupConfig,
}

#[async_trait]
impl Service for GroupService {
    fn name(&self) -> &str {
        self.name
    }

    fn group(&self) -> Option<GroupConfig> {
        Some(self.group.clone())
    }

    async fn on_started(&self, _ctx: &AppContext) -> Result<(), SonarError> {
        info!(service = self.name, group = %self.group.name, "service started");
        Ok(())
    }
}

fn analytics(ctx: &AppContext) -> Box<dyn Service> {
    let group = ctx
        .group_settings(ANALYTICS_GROUP)
        .unwrap_or_else(|| GroupConfig::new(ANALYTICS_GROUP));
    Box::new(GroupService {
        name: "Analytics",
        group,
    })
}

/// Crash reports go out one at a time.
fn crashes(ctx: &AppContext) -> Box<dyn Service> {
    let group = ctx.group_settings(ERRORS_GROUP).unwrap_or_else(|| {
        GroupConfig::new(ERRORS_GROUP)
            .with_batch_size(1)
            .with_batch_interval(Duration::from_secs(1))
    });
    Box::new(GroupService {
        name: "Crashes",
        group,
    })
}

struct DataService;

#[async_trait]
impl Service for DataService {
    fn name(&self) -> &str {
        "Data"
    }

    async fn on_started(&self, ctx: &AppContext) -> Result<(), SonarError> {
        let started = ctx.data().process_pending_operations().await?;
        info!(service = "Data", started, "service started");
        Ok(())
    }
}

fn data(_ctx: &AppContext) -> Box<dyn Service> {
    Box::new(DataService)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn service_ids_parse_case_insensitively() {
        assert_eq!(ServiceId::from_str("analytics").unwrap(), ServiceId::Analytics);
        assert_eq!(ServiceId::from_str("Crashes").unwrap(), ServiceId::Crashes);
        assert!(ServiceId::from_str("push").is_err());
        assert_eq!(ServiceId::Data.to_string(), "data");
    }

    #[test]
    fn builtin_registry_holds_every_service() {
        let registry = ServiceRegistry::builtin();
        assert_eq!(
            registry.ids(),
            vec![ServiceId::Analytics, ServiceId::Crashes, ServiceId::Data]
        );
        assert!(!ServiceRegistry::new().contains(ServiceId::Data));
    }
}
