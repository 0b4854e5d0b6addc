//! Chart repositories inside the test cluster

use crate::platform::kubectl::Kubectl;
use crate::platform::PlatformError;
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

const CHART_MUSEUM_SERVICE: &str = "chartmuseum-chartmuseum";
const CHART_MUSEUM_NAMESPACE: &str = "giantswarm";
const CHART_MUSEUM_PORT: u16 = 8080;

/// Storage the app platform installs charts from
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    async fn upload(&self, chart_file: &Path) -> Result<(), PlatformError>;
}

/// ChartMuseum instance installed by the platform bootstrap
///
/// Uploads go through the API server's service proxy, so no port-forward
/// is needed.
pub struct ChartMuseumRepository {
    kubectl: Kubectl,
}

impl ChartMuseumRepository {
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }

    fn upload_path() -> String {
        format!(
            "/api/v1/namespaces/{}/services/{}:{}/proxy/api/charts?force=true",
            CHART_MUSEUM_NAMESPACE, CHART_MUSEUM_SERVICE, CHART_MUSEUM_PORT
        )
    }
}

#[async_trait]
impl ArtifactRepository for ChartMuseumRepository {
    async fn upload(&self, chart_file: &Path) -> Result<(), PlatformError> {
        self.kubectl
            .run(
                &["get", "service", CHART_MUSEUM_SERVICE, "-n", CHART_MUSEUM_NAMESPACE, "-o", "name"],
                None,
            )
            .await?;

        info!("Uploading chart '{}' to chartmuseum", chart_file.display());
        let file = chart_file.to_string_lossy();
        let path = Self::upload_path();
        self.kubectl
            .run(&["create", "--raw", &path, "-f", &file], None)
            .await
            .map(|_| ())
    }
}
