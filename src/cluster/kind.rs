//! Ephemeral clusters created with `kind`

use crate::cluster::{ClusterInfo, ClusterProvider};
use crate::core::{
    assert_binary_present_in_path, assert_version_in_range, Config, ConfigRegistry, Error,
    ErrorContext, OptionDescriptor, Result,
};
use crate::execution::{CommandSpec, ProcessRunner};
use async_trait::async_trait;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{info, warn};
use uuid::Uuid;

pub const KIND_CLUSTER_TYPE: &str = "kind";
pub const DEFAULT_KIND_IMAGE: &str = "kindest/node:v1.29.2";

const KIND_BIN: &str = "kind";
const KIND_MIN_VERSION: &str = "0.9.0";
const KIND_MAX_VERSION: &str = "1.0.0";
const KIND_CREATE_TIMEOUT: Duration = Duration::from_secs(600);

pub fn kind_image_option() -> OptionDescriptor {
    OptionDescriptor::value(
        "kind-cluster-image",
        "Container image to use for nodes of kind clusters.",
    )
    .with_default(DEFAULT_KIND_IMAGE)
}

pub fn kind_image_override_option() -> OptionDescriptor {
    OptionDescriptor::value(
        "kind-cluster-image-override",
        "Container image forced on every node of a kind cluster, also when a kind config file is used.",
    )
}

/// Creates throw-away clusters with `kind`
pub struct KindClusterProvider {
    runner: Arc<dyn ProcessRunner>,
    kind_path: PathBuf,
    image: String,
    image_override: Option<String>,
    work_dir: PathBuf,
    config_dirs: Vec<TempDir>,
}

impl KindClusterProvider {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            kind_path: PathBuf::from(KIND_BIN),
            image: DEFAULT_KIND_IMAGE.to_string(),
            image_override: None,
            work_dir: PathBuf::from("."),
            config_dirs: Vec::new(),
        }
    }

    /// Directory where kubeconfig files are written
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Copy of a kind config file with every node image replaced
    fn override_config_images(&mut self, config_file: &Path, image: &str) -> Result<PathBuf> {
        let origin = "KindClusterProvider";
        let content = std::fs::read_to_string(config_file).test_err(origin)?;
        let mut doc: Value = serde_yaml::from_str(&content).test_err(origin)?;
        if let Some(nodes) = doc.get_mut("nodes").and_then(Value::as_sequence_mut) {
            for node in nodes.iter_mut() {
                if let Value::Mapping(node) = node {
                    node.insert(Value::from("image"), Value::from(image));
                }
            }
        }

        let dir = tempfile::Builder::new()
            .prefix("ats-kind-")
            .tempdir()
            .test_err(origin)?;
        let path = dir.path().join("kind-config.yaml");
        let rendered = serde_yaml::to_string(&doc).test_err(origin)?;
        std::fs::write(&path, rendered).test_err(origin)?;
        self.config_dirs.push(dir);
        Ok(path)
    }
}

/// Kubernetes version from a node image reference
fn version_from_image(image: &str) -> String {
    let without_digest = image.split('@').next().unwrap_or(image);
    match without_digest.rsplit_once(':') {
        Some((_, tag)) if !tag.contains('/') => tag.to_string(),
        _ => "unknown".to_string(),
    }
}

#[async_trait]
impl ClusterProvider for KindClusterProvider {
    fn provided_cluster_type(&self) -> &'static str {
        KIND_CLUSTER_TYPE
    }

    fn initialize_config(&self, registry: &mut ConfigRegistry) -> Result<()> {
        registry.add(kind_image_option())?;
        registry.add(kind_image_override_option())
    }

    async fn pre_run(&mut self, config: &Config) -> Result<()> {
        let origin = "KindClusterProvider";
        self.kind_path = assert_binary_present_in_path(origin, KIND_BIN)?;

        let output = self
            .runner
            .run(&CommandSpec::new(self.kind_path.to_string_lossy()).arg("version"))
            .await
            .validation_err(origin)?;
        // "kind v0.22.0 go1.21.7 linux/amd64"
        let version = output.stdout.split_whitespace().nth(1).ok_or_else(|| {
            Error::validation(origin, format!("Can't parse '{}' version output.", KIND_BIN))
        })?;
        assert_version_in_range(origin, KIND_BIN, version, KIND_MIN_VERSION, KIND_MAX_VERSION)?;

        if let Some(image) = config.value(&kind_image_option()) {
            self.image = image;
        }
        self.image_override = config.value(&kind_image_override_option());
        Ok(())
    }

    async fn get_cluster(&mut self, config_file: Option<&Path>) -> Result<ClusterInfo> {
        let origin = "KindClusterProvider";
        let name = Uuid::new_v4().to_string();
        let kube_config_path = std::path::absolute(self.work_dir.join(format!("{}.kube.config", name)))
            .test_err(origin)?;

        let image = self.image_override.clone().unwrap_or_else(|| self.image.clone());
        let mut command = CommandSpec::new(self.kind_path.to_string_lossy())
            .args(["create", "cluster", "--name"])
            .arg(name.as_str())
            .arg("--image")
            .arg(image.as_str())
            .arg("--kubeconfig")
            .arg(kube_config_path.to_string_lossy())
            .timeout(KIND_CREATE_TIMEOUT);

        if let Some(file) = config_file {
            if !file.is_file() {
                return Err(Error::config(
                    "kind-cluster-config-file",
                    format!("The kind config file '{}' doesn't exist.", file.display()),
                ));
            }
            let file = match &self.image_override {
                Some(image_override) => {
                    let image_override = image_override.clone();
                    self.override_config_images(file, &image_override)?
                }
                None => file.to_path_buf(),
            };
            command = command.arg("--config").arg(file.to_string_lossy());
        }

        info!("Creating kind cluster {} with image {}", name, image);
        let created = match self.runner.run(&command).await.test_err(origin) {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(Error::test(
                origin,
                format!("Failed to create kind cluster: {}", output.combined()),
            )),
            Err(e) => Err(e),
        };
        if let Err(e) = created {
            // not registered with the manager yet
            if let Err(delete_err) = self.delete_kind_cluster(&name, &kube_config_path).await {
                warn!("Can't remove kind cluster {}: {}", name, delete_err);
            }
            return Err(e);
        }

        Ok(ClusterInfo {
            cluster_type: KIND_CLUSTER_TYPE.to_string(),
            overridden_cluster_type: None,
            version: version_from_image(&image),
            cluster_id: name,
            kube_config_path,
            config_file: config_file.map(Path::to_path_buf),
            app_platform_ready: false,
        })
    }

    async fn delete_cluster(&mut self, cluster: &ClusterInfo) -> Result<()> {
        self.delete_kind_cluster(&cluster.cluster_id, &cluster.kube_config_path)
            .await
    }
}

impl KindClusterProvider {
    async fn delete_kind_cluster(&self, name: &str, kube_config_path: &Path) -> Result<()> {
        let origin = "KindClusterProvider";
        let output = self
            .runner
            .run(
                &CommandSpec::new(self.kind_path.to_string_lossy())
                    .args(["delete", "cluster", "--name"])
                    .arg(name),
            )
            .await
            .test_err(origin)?;
        if !output.success() {
            return Err(Error::test(
                origin,
                format!("Failed to delete kind cluster {}: {}", name, output.combined()),
            ));
        }

        if let Err(e) = std::fs::remove_file(kube_config_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Can't remove kubeconfig '{}': {}", kube_config_path.display(), e);
            }
        }
        Ok(())
    }
}
