//! Test scenarios
//!
//! A scenario deploys the chart under test to a cluster, hands over to the
//! injected [`TestExecutor`] and removes the app again. [`ScenarioCore`] holds
//! the parts shared by the simple and the upgrade scenario.

pub mod simple;
pub mod upgrade;

use crate::cluster::{ClusterInfo, SharedClusterManager};
use crate::core::{
    assert_binary_present_in_path, assert_version_in_range, Config, ConfigRegistry, Error,
    ErrorContext, OptionDescriptor, Result, StepType,
};
use crate::execution::{CommandSpec, ProcessRunner};
use crate::platform::{ClusterConnection, ClusterConnector, ConfiguredApp};
use crate::suite::base::{TestExecInfo, TestExecutor};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use simple::SimpleTestScenario;
pub use upgrade::UpgradeTestScenario;

/// Context key of the [`ConfiguredApp`] deployed by the running scenario
pub const CONTEXT_KEY_APP: &str = "app";

pub const APPTESTCTL_BIN: &str = "apptestctl";
const APPTESTCTL_MIN_VERSION: &str = "0.12.0";
const APPTESTCTL_MAX_VERSION: &str = "1.0.0";

pub const APP_DEPLOYMENT_TIMEOUT: Duration = Duration::from_secs(1800);
pub const APP_DELETION_TIMEOUT: Duration = Duration::from_secs(600);

pub fn cluster_type_option(test_type: StepType) -> OptionDescriptor {
    OptionDescriptor::value(
        format!("{}-tests-cluster-type", test_type),
        format!("Cluster type to use for {} tests.", test_type),
    )
}

pub fn cluster_config_file_option(test_type: StepType) -> OptionDescriptor {
    OptionDescriptor::value(
        format!("{}-tests-cluster-config-file", test_type),
        format!(
            "Additional configuration file for the cluster used for {} tests.",
            test_type
        ),
    )
}

/// Collaborators injected into every scenario
#[derive(Clone)]
pub struct ScenarioDeps {
    pub cluster_manager: SharedClusterManager,
    pub executor: Arc<dyn TestExecutor>,
    pub connector: Arc<dyn ClusterConnector>,
    pub runner: Arc<dyn ProcessRunner>,
}

/// State and behavior shared by all scenarios
pub struct ScenarioCore {
    test_type: StepType,
    deps: ScenarioDeps,
    apptestctl: PathBuf,
    cluster_type: String,
    cluster_config_file: Option<PathBuf>,
    test_dir: PathBuf,
}

impl ScenarioCore {
    pub fn new(test_type: StepType, deps: ScenarioDeps) -> Self {
        Self {
            test_type,
            deps,
            apptestctl: PathBuf::from(APPTESTCTL_BIN),
            cluster_type: String::new(),
            cluster_config_file: None,
            test_dir: PathBuf::new(),
        }
    }

    pub fn test_type(&self) -> StepType {
        self.test_type
    }

    pub fn executor(&self) -> &Arc<dyn TestExecutor> {
        &self.deps.executor
    }

    pub fn runner(&self) -> &Arc<dyn ProcessRunner> {
        &self.deps.runner
    }

    pub fn initialize_config(&self, registry: &mut ConfigRegistry) -> Result<()> {
        registry.add(cluster_type_option(self.test_type))?;
        registry.add(cluster_config_file_option(self.test_type))
    }

    pub async fn pre_run(&mut self, config: &Config, origin: &str) -> Result<()> {
        self.apptestctl = assert_binary_present_in_path(origin, APPTESTCTL_BIN)?;
        let output = self
            .deps
            .runner
            .run(&CommandSpec::new(self.apptestctl.to_string_lossy()).arg("version"))
            .await
            .validation_err(origin)?;
        // "Version: 0.14.1\nGit SHA: ..."
        let version = output
            .stdout
            .lines()
            .next()
            .and_then(|line| line.split(':').nth(1))
            .map(str::trim)
            .ok_or_else(|| {
                Error::validation(origin, format!("Can't parse '{}' version output.", APPTESTCTL_BIN))
            })?;
        assert_version_in_range(
            origin,
            APPTESTCTL_BIN,
            version,
            APPTESTCTL_MIN_VERSION,
            APPTESTCTL_MAX_VERSION,
        )?;

        let type_option = cluster_type_option(self.test_type);
        let cluster_type = config.value(&type_option).unwrap_or_default();
        {
            let mut manager = self.deps.cluster_manager.lock().await;
            if !manager.is_known(&cluster_type) {
                return Err(Error::config(
                    type_option.long(),
                    format!(
                        "Unknown cluster type '{}' requested for tests of type '{}'. Known cluster types are: '{}'.",
                        cluster_type,
                        self.test_type,
                        manager.known_types().join(", ")
                    ),
                ));
            }
            manager.request(&cluster_type);
        }
        self.cluster_type = cluster_type;

        let file_option = cluster_config_file_option(self.test_type);
        self.cluster_config_file = config.path(&file_option);
        if let Some(file) = &self.cluster_config_file {
            if !file.is_file() {
                return Err(Error::config(
                    file_option.long(),
                    format!(
                        "Cluster config file '{}' for cluster type '{}' requested for tests of type '{}' doesn't exist.",
                        file.display(),
                        self.cluster_type,
                        self.test_type
                    ),
                ));
            }
        }

        self.test_dir = self.deps.executor.validate(config, origin)?;
        Ok(())
    }

    /// Get a cluster, connect to it and bootstrap the app platform if needed
    pub async fn prepare_cluster(&self, origin: &str) -> Result<(ClusterInfo, ClusterConnection)> {
        let mut manager = self.deps.cluster_manager.lock().await;
        let cluster = manager
            .get_cluster(&self.cluster_type, self.cluster_config_file.as_deref())
            .await?;

        let connection = self.deps.connector.connect(&cluster).await.map_err(|e| {
            Error::test(
                origin,
                format!("Can't establish connection to the new test cluster: {}", e),
            )
        })?;

        if !cluster.app_platform_ready {
            info!("Running apptestctl tool to initialize app platform in the test cluster.");
            let output = self
                .deps
                .runner
                .run(
                    &CommandSpec::new(self.apptestctl.to_string_lossy())
                        .arg("bootstrap")
                        .arg(format!("--kubeconfig-path={}", cluster.kube_config_path.display()))
                        .arg("--wait"),
                )
                .await
                .test_err(origin)?;
            if !output.success() {
                return Err(Error::test(
                    origin,
                    "Bootstrapping app platform on the target cluster failed",
                ));
            }
            manager.mark_app_platform_ready(&cluster.cluster_id);
            info!("App platform initialization complete.");
        }
        Ok((cluster, connection))
    }

    /// Create an App CR and wait until it's deployed
    #[allow(clippy::too_many_arguments)]
    pub async fn deploy_chart(
        &self,
        connection: &ClusterConnection,
        app_name: &str,
        version: &str,
        namespace: &str,
        config_file: Option<&Path>,
        catalog: &str,
        catalog_namespace: &str,
        origin: &str,
    ) -> Result<ConfiguredApp> {
        let mut app = ConfiguredApp::from_chart_museum(app_name, version, namespace);
        app.catalog = catalog.to_string();
        app.catalog_namespace = catalog_namespace.to_string();
        if config_file.is_some() {
            app = app.with_user_config();
        }

        info!(
            "Deploying chart {} version {} from catalog {} to namespace {}",
            app_name, version, catalog, namespace
        );
        connection
            .platform
            .create_app(&app, config_file)
            .await
            .test_err(origin)?;
        connection
            .platform
            .wait_for_apps_to_run(std::slice::from_ref(&app), APP_DEPLOYMENT_TIMEOUT)
            .await
            .test_err(origin)?;
        info!("Application deployed.");
        Ok(app)
    }

    pub async fn delete_app(
        &self,
        connection: &ClusterConnection,
        app: &ConfiguredApp,
        origin: &str,
    ) -> Result<()> {
        info!("Deleting App CR '{}'.", app.name);
        connection.platform.delete_app(app).await.test_err(origin)?;
        connection
            .platform
            .wait_for_app_deleted(app, APP_DELETION_TIMEOUT)
            .await
            .test_err(origin)?;
        info!("Application deleted.");
        Ok(())
    }

    pub fn exec_info(
        &self,
        cluster: &ClusterInfo,
        chart_path: String,
        chart_version: String,
        app_config_file_path: Option<PathBuf>,
        debug: bool,
    ) -> Result<TestExecInfo> {
        let kube_config_path = std::path::absolute(&cluster.kube_config_path)
            .map_err(|e| Error::test(self.test_type.as_str(), e.to_string()))?;
        Ok(TestExecInfo {
            chart_path,
            chart_version,
            app_config_file_path,
            cluster_type: cluster.reported_type().to_string(),
            cluster_version: cluster.version.clone(),
            kube_config_path,
            test_type: self.test_type.to_string(),
            test_dir: self.test_dir.clone(),
            debug,
            extra: BTreeMap::new(),
        })
    }

    pub async fn run_tests(&self, info: &TestExecInfo) -> Result<()> {
        self.deps.executor.prepare_test_environment(info).await?;
        self.deps.executor.execute_test(info).await
    }
}
