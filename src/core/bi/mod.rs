pub mod filters;
pub mod looker;
pub mod types;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::core::config::BiConfig;
use looker::LookerClient;
pub use types::{DashboardMetadata, Filters, QueryBody, QueryDefinition, QueryResult};

pub type Row = Value;

pub const ADDITIONAL_DASHBOARD_SEPARATOR: &str = "\n\nAdditional Dashboard:\n";

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn run_query(&self, body: &QueryBody) -> Result<Vec<Row>>;
}

#[async_trait]
pub trait DashboardSource: Send + Sync {
    /// Description plus tile queries, with `filters` applied through each tile's listeners.
    async fn fetch_dashboard(
        &self,
        dashboard_id: &str,
        filters: &Filters,
    ) -> Result<DashboardMetadata>;
}

/// Appends `extra` to `main`: descriptions joined, queries concatenated in order.
pub fn merge_dashboards(mut main: DashboardMetadata, extra: DashboardMetadata) -> DashboardMetadata {
    main.description = format!(
        "{}{}{}",
        main.description, ADDITIONAL_DASHBOARD_SEPARATOR, extra.description
    );
    main.queries.extend(extra.queries);
    main
}

#[derive(Clone)]
pub struct BiInstance {
    pub executor: Arc<dyn QueryExecutor>,
    pub dashboards: Arc<dyn DashboardSource>,
}

/// Resolves an `instanceId` to the configured BI instance.
#[derive(Clone, Default)]
pub struct ExecutorFactory {
    instances: BTreeMap<String, BiInstance>,
    default_instance: Option<String>,
}

impl ExecutorFactory {
    pub fn from_config(config: &BiConfig) -> Self {
        let mut factory = Self {
            instances: BTreeMap::new(),
            default_instance: config.default_instance.clone(),
        };
        for (name, instance) in &config.instances {
            let client = Arc::new(LookerClient::new(instance));
            factory.register(name, client.clone(), client);
        }
        info!("Configured {} BI instance(s)", factory.instances.len());
        factory
    }

    pub fn register(
        &mut self,
        name: &str,
        executor: Arc<dyn QueryExecutor>,
        dashboards: Arc<dyn DashboardSource>,
    ) {
        self.instances.insert(
            name.to_string(),
            BiInstance {
                executor,
                dashboards,
            },
        );
    }

    pub fn with_default(mut self, name: &str) -> Self {
        self.default_instance = Some(name.to_string());
        self
    }

    /// An absent or blank id picks the default instance, or the only one configured.
    pub fn resolve(&self, instance_id: Option<&str>) -> Result<BiInstance> {
        let requested = instance_id.map(str::trim).filter(|id| !id.is_empty());
        let name = match requested {
            Some(id) => id.to_string(),
            None => match (&self.default_instance, self.instances.len()) {
                (Some(default), _) => default.clone(),
                (None, 1) => self.instances.keys().next().cloned().unwrap_or_default(),
                _ => return Err(anyhow!("No BI instance requested and no default configured")),
            },
        };
        self.instances
            .get(&name)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown BI instance '{}'", name))
    }
}
