//! Test cluster provisioning
//!
//! Scenarios request clusters of a given type from the [`ClusterManager`],
//! which delegates to the matching [`ClusterProvider`] and deletes every
//! cluster it created during cleanup.

pub mod external;
pub mod kind;

use crate::core::{Config, ConfigRegistry, Error, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

pub use external::ExternalClusterProvider;
pub use kind::KindClusterProvider;

/// Connection details of a test cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    /// Provider type that created the cluster, e.g. `kind`
    pub cluster_type: String,
    /// Type reported to tests instead of the provider type, e.g. `eks`
    pub overridden_cluster_type: Option<String>,
    pub version: String,
    pub cluster_id: String,
    pub kube_config_path: PathBuf,
    /// Provider specific config file the cluster was created with
    pub config_file: Option<PathBuf>,
    /// Whether the app platform is already bootstrapped
    pub app_platform_ready: bool,
}

impl ClusterInfo {
    /// Type as exposed to test code
    pub fn reported_type(&self) -> &str {
        self.overridden_cluster_type
            .as_deref()
            .unwrap_or(&self.cluster_type)
    }
}

/// Creates and deletes clusters of one type
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    /// Cluster type name used in `--<type>-tests-cluster-type`
    fn provided_cluster_type(&self) -> &'static str;

    fn initialize_config(&self, _registry: &mut ConfigRegistry) -> Result<()> {
        Ok(())
    }

    /// Validate configuration; only called when the type was requested
    async fn pre_run(&mut self, _config: &Config) -> Result<()> {
        Ok(())
    }

    async fn get_cluster(&mut self, config_file: Option<&Path>) -> Result<ClusterInfo>;

    async fn delete_cluster(&mut self, cluster: &ClusterInfo) -> Result<()>;
}

/// Hands out clusters and tracks them for cleanup
#[derive(Default)]
pub struct ClusterManager {
    providers: Vec<Box<dyn ClusterProvider>>,
    requested: BTreeSet<String>,
    clusters: Vec<ClusterInfo>,
}

/// Cluster manager shared between a pipeline and its scenarios
pub type SharedClusterManager = Arc<Mutex<ClusterManager>>;

impl ClusterManager {
    pub fn new(providers: Vec<Box<dyn ClusterProvider>>) -> Self {
        Self {
            providers,
            ..Self::default()
        }
    }

    pub fn shared(self) -> SharedClusterManager {
        Arc::new(Mutex::new(self))
    }

    pub fn known_types(&self) -> Vec<&'static str> {
        self.providers
            .iter()
            .map(|p| p.provided_cluster_type())
            .collect()
    }

    pub fn is_known(&self, cluster_type: &str) -> bool {
        self.known_types().contains(&cluster_type)
    }

    /// Record that a scenario is going to use `cluster_type`
    pub fn request(&mut self, cluster_type: &str) {
        self.requested.insert(cluster_type.to_string());
    }

    pub fn requested(&self) -> &BTreeSet<String> {
        &self.requested
    }

    pub fn initialize_config(&self, registry: &mut ConfigRegistry) -> Result<()> {
        for provider in &self.providers {
            provider.initialize_config(registry)?;
        }
        Ok(())
    }

    /// Pre-run the providers of every requested cluster type
    pub async fn pre_run(&mut self, config: &Config) -> Result<()> {
        for provider in self.providers.iter_mut() {
            if self.requested.contains(provider.provided_cluster_type()) {
                provider.pre_run(config).await?;
            }
        }
        Ok(())
    }

    /// Get a cluster, reusing one with the same type and config file
    pub async fn get_cluster(
        &mut self,
        cluster_type: &str,
        config_file: Option<&Path>,
    ) -> Result<ClusterInfo> {
        if let Some(existing) = self
            .clusters
            .iter()
            .find(|c| c.cluster_type == cluster_type && c.config_file.as_deref() == config_file)
        {
            info!("Reusing {} cluster {}", cluster_type, existing.cluster_id);
            return Ok(existing.clone());
        }

        let provider = self
            .providers
            .iter_mut()
            .find(|p| p.provided_cluster_type() == cluster_type)
            .ok_or_else(|| {
                Error::config(
                    "cluster-type",
                    format!("Unknown cluster type '{}' requested.", cluster_type),
                )
            })?;
        info!("Requesting new {} cluster", cluster_type);
        let cluster = provider.get_cluster(config_file).await?;
        self.clusters.push(cluster.clone());
        Ok(cluster)
    }

    pub fn mark_app_platform_ready(&mut self, cluster_id: &str) {
        if let Some(cluster) = self.clusters.iter_mut().find(|c| c.cluster_id == cluster_id) {
            cluster.app_platform_ready = true;
        }
    }

    pub fn clusters(&self) -> &[ClusterInfo] {
        &self.clusters
    }

    /// Delete every cluster created so far
    ///
    /// Failures are logged and the remaining clusters are still deleted.
    pub async fn cleanup(&mut self) -> Result<()> {
        let mut failed = Vec::new();
        for cluster in std::mem::take(&mut self.clusters) {
            let Some(provider) = self
                .providers
                .iter_mut()
                .find(|p| p.provided_cluster_type() == cluster.cluster_type)
            else {
                continue;
            };
            info!("Deleting {} cluster {}", cluster.cluster_type, cluster.cluster_id);
            if let Err(e) = provider.delete_cluster(&cluster).await {
                error!("Error when deleting cluster {}: {}", cluster.cluster_id, e.message());
                failed.push(cluster.cluster_id.clone());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::test(
                "ClusterManager",
                format!("Failed to delete clusters: {}", failed.join(", ")),
            ))
        }
    }
}
