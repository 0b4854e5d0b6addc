//! App platform access
//!
//! The app platform turns `App` custom resources into Helm releases. Test
//! scenarios talk to it through [`AppPlatform`] and upload charts through an
//! [`ArtifactRepository`]; both are obtained per cluster from a
//! [`ClusterConnector`].

pub mod kubectl;
pub mod repository;

use crate::cluster::ClusterInfo;
use crate::execution::ProcessError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use kubectl::{KubectlAppPlatform, KubectlConnector};
pub use repository::{ArtifactRepository, ChartMuseumRepository};

/// Catalog serving the charts uploaded by the suite
pub const CHART_MUSEUM_CATALOG_NAME: &str = "chartmuseum";
pub const CHART_MUSEUM_CATALOG_NAMESPACE: &str = "default";
/// Namespace holding App custom resources created by the suite
pub const APP_CR_NAMESPACE: &str = "default";

/// Errors returned by platform collaborators
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("'{command}' failed: {message}")]
    Command { command: String, message: String },

    #[error("Timed out after {secs}s waiting for {what}")]
    Timeout { what: String, secs: u64 },

    #[error("Can't parse response of '{command}': {message}")]
    Parse { command: String, message: String },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Can't read '{path}': {message}")]
    File { path: String, message: String },
}

/// Reference to a ConfigMap with user values of an app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigMapRef {
    pub name: String,
    pub namespace: String,
}

/// An App custom resource as created by the suite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredApp {
    /// Name of the App CR and of the chart
    pub name: String,
    /// Namespace of the App CR
    pub namespace: String,
    pub catalog: String,
    pub catalog_namespace: String,
    pub version: String,
    /// Namespace the chart gets installed to
    pub target_namespace: String,
    pub config_map: Option<ConfigMapRef>,
}

impl ConfiguredApp {
    /// App from the chartmuseum catalog in the default App CR namespace
    pub fn from_chart_museum(name: &str, version: &str, target_namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: APP_CR_NAMESPACE.to_string(),
            catalog: CHART_MUSEUM_CATALOG_NAME.to_string(),
            catalog_namespace: CHART_MUSEUM_CATALOG_NAMESPACE.to_string(),
            version: version.to_string(),
            target_namespace: target_namespace.to_string(),
            config_map: None,
        }
    }

    /// Attach the user values ConfigMap named after the app
    pub fn with_user_config(mut self) -> Self {
        self.config_map = Some(ConfigMapRef {
            name: format!("{}-testing-user-config", self.name),
            namespace: self.namespace.clone(),
        });
        self
    }
}

/// Catalog custom resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRef {
    pub name: String,
    pub namespace: String,
    pub url: String,
}

/// Kubernetes operations needed by the test scenarios
#[async_trait]
pub trait AppPlatform: Send + Sync {
    /// Create the App CR and, when `values_file` is given, its ConfigMap
    async fn create_app(&self, app: &ConfiguredApp, values_file: Option<&Path>) -> Result<(), PlatformError>;

    async fn wait_for_apps_to_run(&self, apps: &[ConfiguredApp], timeout: Duration) -> Result<(), PlatformError>;

    /// Delete the App CR and its ConfigMap
    async fn delete_app(&self, app: &ConfiguredApp) -> Result<(), PlatformError>;

    async fn wait_for_app_deleted(&self, app: &ConfiguredApp, timeout: Duration) -> Result<(), PlatformError>;

    /// Reconfigure `current` into `target`, creating, updating or deleting
    /// the ConfigMap as needed
    async fn upgrade_app(
        &self,
        current: &ConfiguredApp,
        target: &ConfiguredApp,
        values_file: Option<&Path>,
    ) -> Result<(), PlatformError>;

    async fn create_catalog(&self, catalog: &CatalogRef) -> Result<(), PlatformError>;

    async fn delete_catalog(&self, catalog: &CatalogRef) -> Result<(), PlatformError>;

    /// Storage URL of an existing catalog
    async fn catalog_url(&self, name: &str, namespace: &str) -> Result<String, PlatformError>;
}

/// Platform handles for one cluster
#[derive(Clone)]
pub struct ClusterConnection {
    pub platform: Arc<dyn AppPlatform>,
    pub repository: Arc<dyn ArtifactRepository>,
}

/// Opens platform connections to clusters
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, cluster: &ClusterInfo) -> Result<ClusterConnection, PlatformError>;
}
