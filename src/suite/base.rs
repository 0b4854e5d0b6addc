//! Building blocks shared by every test scenario pipeline

use crate::chart::read_chart_archive;
use crate::cluster::SharedClusterManager;
use crate::core::{
    step_set, Config, ConfigRegistry, Context, Error, OptionDescriptor, Result, Selection, Step,
    StepSet, StepsFilteringPipeline, CONTEXT_KEY_CHART_YAML, STEP_ALL,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const BASE_OPTIONS_GROUP: &str = "Base app testing options";

pub fn chart_file_option() -> OptionDescriptor {
    OptionDescriptor::value("chart-file", "Path to the Helm Chart tar.gz file to test.").with_short('c')
}

pub fn skip_app_deploy_option() -> OptionDescriptor {
    OptionDescriptor::flag(
        "app-tests-skip-app-deploy",
        "Skip automated app deployment for the test run to the test cluster (using an App CR).",
    )
}

pub fn skip_app_delete_option() -> OptionDescriptor {
    OptionDescriptor::flag(
        "app-tests-skip-app-delete",
        "Skip automated app deletion from the test cluster after the test run.",
    )
}

pub fn deploy_namespace_option() -> OptionDescriptor {
    OptionDescriptor::value(
        "app-tests-deploy-namespace",
        "The namespace your app under test should be deployed to for running tests.",
    )
    .with_default("default")
}

pub fn app_config_file_option() -> OptionDescriptor {
    OptionDescriptor::value(
        "app-tests-app-config-file",
        "Path for a configuration file (values file) for your app when it's deployed for testing.",
    )
}

/// Base testing options read back from a [`Config`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseTestOptions {
    pub chart_file: PathBuf,
    pub skip_deploy: bool,
    pub skip_delete: bool,
    pub deploy_namespace: String,
    pub app_config_file: Option<PathBuf>,
}

impl BaseTestOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        let chart_file = config
            .path(&chart_file_option())
            .ok_or_else(|| Error::config("chart-file", "Path to the chart file is required."))?;
        Ok(Self {
            chart_file,
            skip_deploy: config.flag(&skip_app_deploy_option()),
            skip_delete: config.flag(&skip_app_delete_option()),
            deploy_namespace: config
                .value(&deploy_namespace_option())
                .unwrap_or_else(|| "default".to_string()),
            app_config_file: config.path(&app_config_file_option()),
        })
    }
}

/// Everything a [`TestExecutor`] needs to run one batch of tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestExecInfo {
    pub chart_path: String,
    pub chart_version: String,
    pub app_config_file_path: Option<PathBuf>,
    pub cluster_type: String,
    pub cluster_version: String,
    pub kube_config_path: PathBuf,
    pub test_type: String,
    pub test_dir: PathBuf,
    pub debug: bool,
    /// Exported as `ATS_EXTRA_<KEY>`
    pub extra: BTreeMap<String, String>,
}

impl TestExecInfo {
    /// Environment passed to the test process
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            ("ATS_CHART_PATH".to_string(), self.chart_path.clone()),
            ("ATS_CHART_VERSION".to_string(), self.chart_version.clone()),
            ("ATS_CLUSTER_TYPE".to_string(), self.cluster_type.clone()),
            ("ATS_CLUSTER_VERSION".to_string(), self.cluster_version.clone()),
            ("ATS_TEST_TYPE".to_string(), self.test_type.clone()),
            ("ATS_TEST_DIR".to_string(), self.test_dir.display().to_string()),
            ("KUBECONFIG".to_string(), self.kube_config_path.display().to_string()),
        ];
        if let Some(path) = &self.app_config_file_path {
            vars.push(("ATS_APP_CONFIG_FILE_PATH".to_string(), path.display().to_string()));
        }
        for (key, value) in &self.extra {
            vars.push((format!("ATS_EXTRA_{}", key.to_uppercase()), value.clone()));
        }
        vars
    }
}

/// Runs tests with a specific test framework
#[async_trait]
pub trait TestExecutor: Send + Sync {
    /// Human readable name, used for the option group heading
    fn name(&self) -> &'static str;

    fn initialize_config(&self, _registry: &mut ConfigRegistry) -> Result<()> {
        Ok(())
    }

    /// Check the configuration and return the directory holding the tests
    fn validate(&self, config: &Config, origin: &str) -> Result<PathBuf>;

    /// Install whatever the tests need before they run
    async fn prepare_test_environment(&self, _info: &TestExecInfo) -> Result<()> {
        Ok(())
    }

    async fn execute_test(&self, info: &TestExecInfo) -> Result<()>;
}

/// Directory relative to the chart file's parent directory
pub fn dir_next_to_chart(config: &Config, dir: &str) -> PathBuf {
    config
        .path(&chart_file_option())
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_default()
        .join(dir)
}

/// True if `dir` holds at least one file with the given extension
pub fn dir_has_files_with_extension(dir: &Path, extension: &str) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .any(|e| e.path().extension().is_some_and(|ext| ext == extension))
        })
        .unwrap_or(false)
}

/// Loads `Chart.yaml` of the chart under test into the context
#[derive(Debug, Default)]
pub struct TestInfoProvider;

impl TestInfoProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Step for TestInfoProvider {
    fn steps_provided(&self) -> StepSet {
        step_set(&[STEP_ALL])
    }

    async fn run(&mut self, config: &Config, context: &mut Context) -> Result<()> {
        let chart_file = BaseTestOptions::from_config(config)?.chart_file;
        let chart = read_chart_archive(&chart_file)
            .map_err(|e| Error::validation(self.name(), format!("{:#}", e)))?
            .ok_or_else(|| {
                Error::validation(
                    self.name(),
                    "Couldn't find 'Chart.yaml' in any subdirectory of the chart archive file.",
                )
            })?;
        for (field, value) in [("name", &chart.name), ("version", &chart.version)] {
            if value.trim().is_empty() {
                return Err(Error::validation(
                    self.name(),
                    format!("Chart.yaml in '{}' has no '{}'.", chart_file.display(), field),
                ));
            }
        }
        debug!("Loaded Chart.yaml of chart {} version {}", chart.name, chart.version);
        context.insert(CONTEXT_KEY_CHART_YAML, chart);
        Ok(())
    }
}

/// Pipeline running test scenarios with one test executor
///
/// Owns the cluster manager shared by its scenarios, so clusters are deleted
/// once all scenarios are done.
pub struct BaseTestScenariosPipeline {
    name: &'static str,
    pipeline: StepsFilteringPipeline,
    cluster_manager: SharedClusterManager,
    executor: Arc<dyn TestExecutor>,
}

impl BaseTestScenariosPipeline {
    pub fn new(
        name: &'static str,
        steps: Vec<Box<dyn Step>>,
        cluster_manager: SharedClusterManager,
        executor: Arc<dyn TestExecutor>,
    ) -> Self {
        Self {
            name,
            pipeline: StepsFilteringPipeline::new(BASE_OPTIONS_GROUP, steps),
            cluster_manager,
            executor,
        }
    }

    pub fn pipeline(&self) -> &StepsFilteringPipeline {
        &self.pipeline
    }

    fn check_app_config_file(&self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(Error::test(
                self.name,
                format!(
                    "Application test run was configured to use '{}' as app config file, but it doesn't exist.",
                    path.display()
                ),
            ));
        }
        let content = std::fs::read_to_string(path).map_err(|e| Error::test(self.name, e.to_string()))?;
        serde_yaml::from_str::<serde_yaml::Value>(&content).map_err(|_| {
            Error::test(
                self.name,
                format!(
                    "Application config file '{}' found, but can't be loaded as a correct YAML document.",
                    path.display()
                ),
            )
        })?;
        Ok(())
    }
}

#[async_trait]
impl Step for BaseTestScenariosPipeline {
    fn name(&self) -> &'static str {
        self.name
    }

    fn steps_provided(&self) -> StepSet {
        self.pipeline.steps_provided()
    }

    fn initialize_config(&self, registry: &mut ConfigRegistry) -> Result<()> {
        self.pipeline.initialize_config(registry)?;
        registry.set_heading(BASE_OPTIONS_GROUP);
        registry.add(chart_file_option())?;
        registry.add(skip_app_deploy_option())?;
        registry.add(skip_app_delete_option())?;
        registry.add(deploy_namespace_option())?;
        registry.add(app_config_file_option())?;
        let manager = self.cluster_manager.try_lock().map_err(|_| {
            Error::config("cluster-type", "Cluster manager is busy during configuration.")
        })?;
        manager.initialize_config(registry)?;

        registry.set_heading(format!("{} specific options", self.executor.name()));
        self.executor.initialize_config(registry)
    }

    fn is_selected(&mut self, selection: &Selection) -> bool {
        self.pipeline.is_selected(selection)
    }

    async fn pre_run(&mut self, config: &Config) -> Result<()> {
        self.pipeline.pre_run(config).await?;
        if self.pipeline.all_pre_runs_skipped() {
            return Ok(());
        }

        let options = BaseTestOptions::from_config(config)?;
        if !options.chart_file.is_file() {
            return Err(Error::config(
                "chart-file",
                format!("The file '{}' can't be found.", options.chart_file.display()),
            ));
        }

        self.cluster_manager.lock().await.pre_run(config).await?;

        if let Some(path) = &options.app_config_file {
            self.check_app_config_file(path)?;
        }
        Ok(())
    }

    async fn run(&mut self, config: &Config, context: &mut Context) -> Result<()> {
        self.pipeline.run(config, context).await
    }

    async fn cleanup(
        &mut self,
        config: &Config,
        context: &mut Context,
        has_build_failed: bool,
    ) -> Result<()> {
        let steps_result = self.pipeline.cleanup(config, context, has_build_failed).await;
        info!("Deleting test clusters");
        let clusters_result = self.cluster_manager.lock().await.cleanup().await;
        steps_result.and(clusters_result)
    }
}
