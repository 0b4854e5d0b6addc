//! App platform driven through `kubectl`

use crate::cluster::ClusterInfo;
use crate::execution::{CommandSpec, ProcessOutput, ProcessRunner};
use crate::platform::{
    AppPlatform, CatalogRef, ChartMuseumRepository, ClusterConnection, ClusterConnector,
    ConfiguredApp, PlatformError,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info};

const KUBECTL_BIN: &str = "kubectl";
const APP_API_VERSION: &str = "application.giantswarm.io/v1alpha1";
const DEPLOYED_STATUS: &str = "deployed";

/// Connects to clusters with `kubectl` and a kubeconfig file
pub struct KubectlConnector {
    runner: Arc<dyn ProcessRunner>,
}

impl KubectlConnector {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ClusterConnector for KubectlConnector {
    async fn connect(&self, cluster: &ClusterInfo) -> Result<ClusterConnection, PlatformError> {
        let kubectl = Kubectl::new(self.runner.clone(), cluster.kube_config_path.clone());
        kubectl.get_json(&["version"]).await?;
        info!("Connected to cluster {}", cluster.cluster_id);
        Ok(ClusterConnection {
            platform: Arc::new(KubectlAppPlatform::new(kubectl.clone())),
            repository: Arc::new(ChartMuseumRepository::new(kubectl)),
        })
    }
}

/// Thin `kubectl` wrapper bound to one kubeconfig
#[derive(Clone)]
pub struct Kubectl {
    runner: Arc<dyn ProcessRunner>,
    kube_config_path: PathBuf,
}

impl Kubectl {
    pub fn new(runner: Arc<dyn ProcessRunner>, kube_config_path: PathBuf) -> Self {
        Self {
            runner,
            kube_config_path,
        }
    }

    fn command(&self, args: &[&str]) -> CommandSpec {
        CommandSpec::new(KUBECTL_BIN)
            .arg("--kubeconfig")
            .arg(self.kube_config_path.to_string_lossy())
            .args(args.iter().copied())
    }

    /// Run kubectl and fail on a non-zero exit code
    pub async fn run(&self, args: &[&str], stdin: Option<String>) -> Result<ProcessOutput, PlatformError> {
        let mut command = self.command(args);
        if let Some(input) = stdin {
            command = command.stdin(input);
        }
        let output = self.runner.run(&command).await?;
        if !output.success() {
            return Err(PlatformError::Command {
                command: command.to_string(),
                message: output.combined(),
            });
        }
        Ok(output)
    }

    pub async fn apply(&self, manifest: &Value) -> Result<(), PlatformError> {
        debug!("Applying manifest: {}", manifest);
        self.run(&["apply", "-f", "-"], Some(manifest.to_string()))
            .await
            .map(|_| ())
    }

    pub async fn get_json(&self, args: &[&str]) -> Result<Value, PlatformError> {
        let mut full: Vec<&str> = args.to_vec();
        full.extend(["-o", "json"]);
        let output = self.run(&full, None).await?;
        serde_json::from_str(&output.stdout).map_err(|e| PlatformError::Parse {
            command: format!("{} {}", KUBECTL_BIN, full.join(" ")),
            message: e.to_string(),
        })
    }
}

/// App platform implementation talking to the cluster through `kubectl`
pub struct KubectlAppPlatform {
    kubectl: Kubectl,
    poll_interval: Duration,
}

impl KubectlAppPlatform {
    pub fn new(kubectl: Kubectl) -> Self {
        Self {
            kubectl,
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn apply_config_map(&self, app: &ConfiguredApp, values_file: &Path) -> Result<(), PlatformError> {
        let Some(cm) = &app.config_map else {
            return Ok(());
        };
        let values = tokio::fs::read_to_string(values_file)
            .await
            .map_err(|e| PlatformError::File {
                path: values_file.display().to_string(),
                message: e.to_string(),
            })?;
        self.kubectl
            .apply(&config_map_manifest(&cm.name, &cm.namespace, &values))
            .await
    }

    async fn delete_config_map(&self, app: &ConfiguredApp) -> Result<(), PlatformError> {
        let Some(cm) = &app.config_map else {
            return Ok(());
        };
        self.kubectl
            .run(
                &["delete", "configmap", &cm.name, "-n", &cm.namespace, "--ignore-not-found"],
                None,
            )
            .await
            .map(|_| ())
    }

    async fn app_status(&self, app: &ConfiguredApp) -> Result<Option<String>, PlatformError> {
        let doc = self
            .kubectl
            .get_json(&["get", "app", &app.name, "-n", &app.namespace])
            .await?;
        Ok(doc
            .pointer("/status/release/status")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn app_exists(&self, app: &ConfiguredApp) -> Result<bool, PlatformError> {
        let output = self
            .kubectl
            .run(
                &["get", "app", &app.name, "-n", &app.namespace, "--ignore-not-found", "-o", "name"],
                None,
            )
            .await?;
        Ok(!output.stdout.trim().is_empty())
    }
}

fn config_map_manifest(name: &str, namespace: &str, values: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": name, "namespace": namespace },
        "data": { "values": values },
    })
}

fn app_manifest(app: &ConfiguredApp) -> Value {
    let mut spec = json!({
        "catalog": app.catalog,
        "catalogNamespace": app.catalog_namespace,
        "name": app.name,
        "namespace": app.target_namespace,
        "version": app.version,
        "kubeConfig": { "inCluster": true },
    });
    if let Some(cm) = &app.config_map {
        spec["userConfig"] = json!({
            "configMap": { "name": cm.name, "namespace": cm.namespace },
        });
    }
    json!({
        "apiVersion": APP_API_VERSION,
        "kind": "App",
        "metadata": {
            "name": app.name,
            "namespace": app.namespace,
            "labels": { "app-operator.giantswarm.io/version": "0.0.0" },
        },
        "spec": spec,
    })
}

fn catalog_manifest(catalog: &CatalogRef) -> Value {
    json!({
        "apiVersion": APP_API_VERSION,
        "kind": "Catalog",
        "metadata": {
            "name": catalog.name,
            "namespace": catalog.namespace,
            "labels": { "app-operator.giantswarm.io/version": "0.0.0" },
        },
        "spec": {
            "title": catalog.name,
            "description": format!("Catalog {} created for testing", catalog.name),
            "logoURL": "",
            "storage": { "type": "helm", "URL": catalog.url },
            "repositories": [ { "type": "helm", "URL": catalog.url } ],
        },
    })
}

#[async_trait]
impl AppPlatform for KubectlAppPlatform {
    async fn create_app(&self, app: &ConfiguredApp, values_file: Option<&Path>) -> Result<(), PlatformError> {
        if let Some(file) = values_file {
            self.apply_config_map(app, file).await?;
        }
        info!("Creating App CR {}/{} version {}", app.namespace, app.name, app.version);
        self.kubectl.apply(&app_manifest(app)).await
    }

    async fn wait_for_apps_to_run(&self, apps: &[ConfiguredApp], timeout: Duration) -> Result<(), PlatformError> {
        let start = Instant::now();
        for app in apps {
            loop {
                match self.app_status(app).await {
                    Ok(Some(status)) if status == DEPLOYED_STATUS => {
                        info!("App {} is deployed", app.name);
                        break;
                    }
                    Ok(status) => debug!("App {} status: {:?}", app.name, status),
                    Err(e) => debug!("Can't read status of app {}: {}", app.name, e),
                }
                if start.elapsed() > timeout {
                    return Err(PlatformError::Timeout {
                        what: format!("app {} to be deployed", app.name),
                        secs: timeout.as_secs(),
                    });
                }
                sleep(self.poll_interval).await;
            }
        }
        Ok(())
    }

    async fn delete_app(&self, app: &ConfiguredApp) -> Result<(), PlatformError> {
        info!("Deleting App CR {}/{}", app.namespace, app.name);
        self.kubectl
            .run(
                &["delete", "app", &app.name, "-n", &app.namespace, "--ignore-not-found"],
                None,
            )
            .await?;
        self.delete_config_map(app).await
    }

    async fn wait_for_app_deleted(&self, app: &ConfiguredApp, timeout: Duration) -> Result<(), PlatformError> {
        let start = Instant::now();
        while self.app_exists(app).await? {
            if start.elapsed() > timeout {
                return Err(PlatformError::Timeout {
                    what: format!("app {} to be deleted", app.name),
                    secs: timeout.as_secs(),
                });
            }
            sleep(self.poll_interval).await;
        }
        Ok(())
    }

    async fn upgrade_app(
        &self,
        current: &ConfiguredApp,
        target: &ConfiguredApp,
        values_file: Option<&Path>,
    ) -> Result<(), PlatformError> {
        match values_file {
            Some(file) => self.apply_config_map(target, file).await?,
            None => {
                if current.config_map.is_some() && target.config_map.is_none() {
                    self.delete_config_map(current).await?;
                }
            }
        }
        info!(
            "Upgrading App CR {}/{} from {} to {}",
            target.namespace, target.name, current.version, target.version
        );
        self.kubectl.apply(&app_manifest(target)).await
    }

    async fn create_catalog(&self, catalog: &CatalogRef) -> Result<(), PlatformError> {
        info!("Creating Catalog {}/{} for {}", catalog.namespace, catalog.name, catalog.url);
        self.kubectl.apply(&catalog_manifest(catalog)).await
    }

    async fn delete_catalog(&self, catalog: &CatalogRef) -> Result<(), PlatformError> {
        info!("Deleting Catalog {}/{}", catalog.namespace, catalog.name);
        self.kubectl
            .run(
                &["delete", "catalog", &catalog.name, "-n", &catalog.namespace, "--ignore-not-found"],
                None,
            )
            .await
            .map(|_| ())
    }

    async fn catalog_url(&self, name: &str, namespace: &str) -> Result<String, PlatformError> {
        let doc = self
            .kubectl
            .get_json(&["get", "catalog", name, "-n", namespace])
            .await?;
        doc.pointer("/spec/storage/URL")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PlatformError::Parse {
                command: format!("{} get catalog {}", KUBECTL_BIN, name),
                message: "catalog has no storage URL".to_string(),
            })
    }
}
