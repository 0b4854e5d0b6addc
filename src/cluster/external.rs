//! Clusters managed outside of the suite

use crate::cluster::{ClusterInfo, ClusterProvider};
use crate::core::{Config, ConfigRegistry, Error, OptionDescriptor, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

pub const EXTERNAL_CLUSTER_TYPE: &str = "external";

pub fn kubeconfig_path_option() -> OptionDescriptor {
    OptionDescriptor::value(
        "external-cluster-kubeconfig-path",
        "A path to the kubeconfig file of an existing cluster to run tests on.",
    )
}

pub fn cluster_type_option() -> OptionDescriptor {
    OptionDescriptor::value(
        "external-cluster-type",
        "Cluster type reported to tests when running on an external cluster.",
    )
}

pub fn cluster_version_option() -> OptionDescriptor {
    OptionDescriptor::value(
        "external-cluster-version",
        "Kubernetes version reported to tests when running on an external cluster.",
    )
}

/// Hands out a single, pre-existing cluster
#[derive(Debug, Default)]
pub struct ExternalClusterProvider {
    kube_config_path: PathBuf,
    cluster_type: String,
    version: String,
}

impl ExternalClusterProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

fn required(config: &Config, option: &OptionDescriptor) -> Result<String> {
    config
        .value(option)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            Error::config(
                option.long(),
                "This option is required when the external cluster type is used.",
            )
        })
}

#[async_trait]
impl ClusterProvider for ExternalClusterProvider {
    fn provided_cluster_type(&self) -> &'static str {
        EXTERNAL_CLUSTER_TYPE
    }

    fn initialize_config(&self, registry: &mut ConfigRegistry) -> Result<()> {
        registry.add(kubeconfig_path_option())?;
        registry.add(cluster_type_option())?;
        registry.add(cluster_version_option())
    }

    async fn pre_run(&mut self, config: &Config) -> Result<()> {
        let kube_config = kubeconfig_path_option();
        let path = PathBuf::from(required(config, &kube_config)?);
        if !path.is_file() {
            return Err(Error::config(
                kube_config.long(),
                format!("The kubeconfig file '{}' doesn't exist.", path.display()),
            ));
        }
        self.kube_config_path = path;
        self.cluster_type = required(config, &cluster_type_option())?;
        self.version = required(config, &cluster_version_option())?;
        Ok(())
    }

    async fn get_cluster(&mut self, config_file: Option<&Path>) -> Result<ClusterInfo> {
        info!(
            "Using external {} cluster from '{}'",
            self.cluster_type,
            self.kube_config_path.display()
        );
        Ok(ClusterInfo {
            cluster_type: EXTERNAL_CLUSTER_TYPE.to_string(),
            overridden_cluster_type: Some(self.cluster_type.clone()),
            version: self.version.clone(),
            cluster_id: format!("{}-{}", EXTERNAL_CLUSTER_TYPE, self.cluster_type),
            kube_config_path: self.kube_config_path.clone(),
            config_file: config_file.map(Path::to_path_buf),
            app_platform_ready: false,
        })
    }

    async fn delete_cluster(&mut self, cluster: &ClusterInfo) -> Result<()> {
        info!("Not deleting external cluster {}", cluster.cluster_id);
        Ok(())
    }
}
