//! Upgrade test scenario
//!
//! Deploys a stable version of the app, runs the tests, switches the App CR
//! to the version under test and runs the tests again. An optional hook
//! executable is called right before and right after the switch.

use crate::chart::{read_chart_archive, ChartMetadata};
use crate::cluster::ClusterInfo;
use crate::core::{
    find_binary, step_set, Config, ConfigRegistry, Context, Error, ErrorContext, OptionDescriptor,
    Result, Step, StepSet, STEP_ALL,
};
use crate::execution::CommandSpec;
use crate::platform::{
    CatalogRef, ClusterConnection, ConfiguredApp, CHART_MUSEUM_CATALOG_NAME,
    CHART_MUSEUM_CATALOG_NAMESPACE,
};
use crate::suite::base::{BaseTestOptions, TestExecInfo};
use crate::suite::catalog::{chart_url, get_latest_version, ChartSource};
use crate::suite::scenarios::simple::{chart_from_context, delete_deployed_app};
use crate::suite::scenarios::{ScenarioCore, ScenarioDeps, APP_DEPLOYMENT_TIMEOUT, CONTEXT_KEY_APP};
use crate::suite::STEP_UPGRADE;
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const KEY_PRE_UPGRADE: &str = "pre-upgrade";
pub const KEY_POST_UPGRADE: &str = "post-upgrade";
pub const STABLE_APP_CATALOG_NAME: &str = "stable";

const LATEST_VERSION: &str = "latest";
const STABLE_FILE_VERSION_PATTERN: &str = r"^.+?-((0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)[^/]*)\.tgz$";

pub fn stable_app_catalog_url_option() -> OptionDescriptor {
    OptionDescriptor::value(
        "upgrade-tests-app-catalog-url",
        "URL of the catalog where the stable version of the app (the version to upgrade from) is available.",
    )
}

pub fn stable_app_file_option() -> OptionDescriptor {
    OptionDescriptor::value(
        "upgrade-tests-app-file",
        "Path to the chart file of the stable version of the app (the version to upgrade from).",
    )
}

pub fn stable_app_version_option() -> OptionDescriptor {
    OptionDescriptor::value(
        "upgrade-tests-app-version",
        "Version of the app to upgrade from. 'latest' picks the highest version in the catalog.",
    )
    .with_default(LATEST_VERSION)
}

pub fn stable_app_config_file_option() -> OptionDescriptor {
    OptionDescriptor::value(
        "upgrade-tests-app-config-file",
        "Path for a configuration file (values file) for the stable version of the app.",
    )
}

pub fn upgrade_hook_option() -> OptionDescriptor {
    OptionDescriptor::value(
        "upgrade-tests-upgrade-hook",
        "Executable called before and after the upgrade with the stage, app name, versions, kubeconfig path and namespace as arguments.",
    )
}

pub fn save_metadata_option() -> OptionDescriptor {
    OptionDescriptor::flag(
        "upgrade-tests-save-metadata",
        "Save a YAML file with the result of the upgrade test.",
    )
}

/// Upgrade options read back from a [`Config`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeOptions {
    pub catalog_url: Option<String>,
    pub stable_file: Option<PathBuf>,
    pub version: String,
    pub stable_config_file: Option<PathBuf>,
    pub hook: Option<String>,
    pub save_metadata: bool,
}

impl UpgradeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            catalog_url: config
                .value(&stable_app_catalog_url_option())
                .filter(|v| !v.is_empty()),
            stable_file: config.path(&stable_app_file_option()),
            version: config.value(&stable_app_version_option()).unwrap_or_default(),
            stable_config_file: config.path(&stable_app_config_file_option()),
            hook: config
                .value(&upgrade_hook_option())
                .filter(|v| !v.trim().is_empty()),
            save_metadata: config.flag(&save_metadata_option()),
        }
    }
}

/// Result of an upgrade test, saved with `--upgrade-tests-save-metadata`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeMetadata {
    pub app_name: String,
    pub chart_version: String,
    pub app_version: String,
    pub cluster_type: String,
    pub cluster_version: String,
    pub upgrade_to_chart_version: String,
    pub upgrade_to_app_version: String,
    pub timestamp: String,
}

impl UpgradeMetadata {
    /// `<root>/<app>-<stable version>-meta/tested-upgrade-<version>.yaml`
    pub fn path_in(&self, root: &Path) -> PathBuf {
        root.join(format!("{}-{}-meta", self.app_name, self.upgrade_to_chart_version))
            .join(format!("tested-upgrade-{}.yaml", self.chart_version))
    }

    pub fn save(&self, root: &Path) -> anyhow::Result<PathBuf> {
        let path = self.path_in(root);
        if let Some(dir) = path.parent() {
            if !dir.is_dir() {
                debug!("Creating '{}' directory to store metadata.", dir.display());
                std::fs::create_dir_all(dir)?;
            }
        }
        std::fs::write(&path, serde_yaml::to_string(self)?)?;
        Ok(path)
    }
}

/// Version embedded in a chart archive name like `hello-1.2.3.tgz`
pub fn stable_version_from_file_name(path: &str) -> Option<String> {
    let regex = Regex::new(STABLE_FILE_VERSION_PATTERN).ok()?;
    regex
        .captures(path)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Stable app as prepared before deployment
struct StableApp {
    version: String,
    catalog: String,
    catalog_namespace: String,
    chart_url: String,
    chart: ChartMetadata,
}

/// Chart, versions and cluster of a finished upgrade
struct UpgradeOutcome {
    stable_chart: ChartMetadata,
    cluster: ClusterInfo,
}

pub struct UpgradeTestScenario {
    core: ScenarioCore,
    chart_source: Arc<dyn ChartSource>,
    metadata_dir: PathBuf,
}

impl UpgradeTestScenario {
    pub fn new(deps: ScenarioDeps, chart_source: Arc<dyn ChartSource>) -> Self {
        Self {
            core: ScenarioCore::new(STEP_UPGRADE, deps),
            chart_source,
            metadata_dir: PathBuf::from("."),
        }
    }

    /// Directory the metadata directory is created in
    pub fn with_metadata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.metadata_dir = dir.into();
        self
    }

    async fn prepare_stable_app(
        &self,
        options: &UpgradeOptions,
        connection: &ClusterConnection,
        app_name: &str,
        deploy_namespace: &str,
        created_catalog: &mut Option<CatalogRef>,
    ) -> Result<StableApp> {
        let origin = self.name();

        if let Some(file) = &options.stable_file {
            connection.repository.upload(file).await.test_err(origin)?;
            let chart = read_stable_chart(file, origin)?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let version = if chart.version.trim().is_empty() {
                stable_version_from_file_name(&file_name).ok_or_else(|| {
                    Error::test(
                        origin,
                        format!("Can't detect the version of the stable chart from file name '{}'.", file_name),
                    )
                })?
            } else {
                chart.version.clone()
            };
            let catalog_url = connection
                .platform
                .catalog_url(CHART_MUSEUM_CATALOG_NAME, CHART_MUSEUM_CATALOG_NAMESPACE)
                .await
                .test_err(origin)?;
            return Ok(StableApp {
                chart_url: chart_url(&catalog_url, app_name, &version),
                version,
                catalog: CHART_MUSEUM_CATALOG_NAME.to_string(),
                catalog_namespace: CHART_MUSEUM_CATALOG_NAMESPACE.to_string(),
                chart,
            });
        }

        let catalog_url = options
            .catalog_url
            .clone()
            .ok_or_else(|| Error::test(origin, "No source of the stable app is configured."))?;
        info!(
            "Adding new app catalog named '{}' with URL '{}'.",
            STABLE_APP_CATALOG_NAME, catalog_url
        );
        let catalog = CatalogRef {
            name: STABLE_APP_CATALOG_NAME.to_string(),
            namespace: deploy_namespace.to_string(),
            url: catalog_url.clone(),
        };
        connection
            .platform
            .create_catalog(&catalog)
            .await
            .test_err(origin)?;
        *created_catalog = Some(catalog);

        let version = if options.version == LATEST_VERSION {
            get_latest_version(self.chart_source.as_ref(), &catalog_url, app_name)
                .await
                .test_err(origin)?
        } else {
            options.version.clone()
        };
        info!("Using version '{}' of app '{}' as the stable version.", version, app_name);

        let download_dir = tempfile::Builder::new()
            .suffix("-ats-download")
            .tempdir()
            .test_err(origin)?;
        let file = self
            .chart_source
            .download_chart(&catalog_url, app_name, &version, download_dir.path())
            .await
            .test_err(origin)?;
        let chart = read_stable_chart(&file, origin)?;

        Ok(StableApp {
            chart_url: chart_url(&catalog_url, app_name, &version),
            version,
            catalog: STABLE_APP_CATALOG_NAME.to_string(),
            catalog_namespace: deploy_namespace.to_string(),
            chart,
        })
    }

    async fn run_upgrade_hook(
        &self,
        options: &UpgradeOptions,
        stage: &str,
        app_name: &str,
        from_version: &str,
        to_version: &str,
        cluster: &ClusterInfo,
        namespace: &str,
    ) -> Result<()> {
        let Some(hook) = &options.hook else {
            info!("No upgrade test {} hook configured. Moving on.", stage);
            return Ok(());
        };
        info!("Executing upgrade hook: '{}' with stage '{}'.", hook, stage);

        let mut words = hook.split(' ').filter(|w| !w.is_empty());
        let program = words.next().unwrap_or_default();
        let command = CommandSpec::new(program).args(words).args([
            stage.to_string(),
            app_name.to_string(),
            from_version.to_string(),
            to_version.to_string(),
            cluster.kube_config_path.display().to_string(),
            namespace.to_string(),
        ]);
        let output = self
            .core
            .runner()
            .run(&command)
            .await
            .test_err(self.name())?;
        if !output.success() {
            return Err(Error::test(
                self.name(),
                format!(
                    "Upgrade hook for stage '{}' returned non-zero exit code: '{}'.",
                    stage, output.code
                ),
            ));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn upgrade_and_test(
        &self,
        config: &Config,
        context: &mut Context,
        base: &BaseTestOptions,
        options: &UpgradeOptions,
        chart: &ChartMetadata,
        connection: &ClusterConnection,
        cluster: &ClusterInfo,
        created_catalog: &mut Option<CatalogRef>,
    ) -> Result<ChartMetadata> {
        let origin = self.name();
        let stable = self
            .prepare_stable_app(options, connection, &chart.name, &base.deploy_namespace, created_catalog)
            .await?;

        let stable_app = self
            .core
            .deploy_chart(
                connection,
                &chart.name,
                &stable.version,
                &base.deploy_namespace,
                options.stable_config_file.as_deref(),
                &stable.catalog,
                &stable.catalog_namespace,
                origin,
            )
            .await?;
        context.insert(CONTEXT_KEY_APP, stable_app.clone());

        let mut info: TestExecInfo = self.core.exec_info(
            cluster,
            stable.chart_url.clone(),
            stable.version.clone(),
            options.stable_config_file.clone(),
            config.debug(),
        )?;
        info.extra.insert("STAGE".to_string(), KEY_PRE_UPGRADE.to_string());
        info.extra.insert("FROM_VERSION".to_string(), stable.version.clone());
        info.extra.insert("TO_VERSION".to_string(), chart.version.clone());
        self.core.run_tests(&info).await?;

        self.run_upgrade_hook(
            options,
            KEY_PRE_UPGRADE,
            &chart.name,
            &stable.version,
            &chart.version,
            cluster,
            &base.deploy_namespace,
        )
        .await?;

        let mut target = stable_app.clone();
        target.catalog = CHART_MUSEUM_CATALOG_NAME.to_string();
        target.catalog_namespace = CHART_MUSEUM_CATALOG_NAMESPACE.to_string();
        target.version = chart.version.clone();
        target.config_map = None;
        if base.app_config_file.is_some() {
            target = target.with_user_config();
        }
        info!("Updating App CR to point to the newer version.");
        connection
            .platform
            .upgrade_app(&stable_app, &target, base.app_config_file.as_deref())
            .await
            .test_err(origin)?;
        context.insert(CONTEXT_KEY_APP, target.clone());
        connection
            .platform
            .wait_for_apps_to_run(std::slice::from_ref(&target), APP_DEPLOYMENT_TIMEOUT)
            .await
            .test_err(origin)?;

        self.run_upgrade_hook(
            options,
            KEY_POST_UPGRADE,
            &chart.name,
            &stable.version,
            &chart.version,
            cluster,
            &base.deploy_namespace,
        )
        .await?;

        info.chart_path = base.chart_file.display().to_string();
        info.chart_version = chart.version.clone();
        info.app_config_file_path = base.app_config_file.clone();
        info.extra.insert("STAGE".to_string(), KEY_POST_UPGRADE.to_string());
        self.core.executor().execute_test(&info).await?;

        Ok(stable.chart)
    }

    fn save_metadata(&self, chart: &ChartMetadata, outcome: &UpgradeOutcome) -> Result<()> {
        let metadata = UpgradeMetadata {
            app_name: chart.name.clone(),
            chart_version: chart.version.clone(),
            app_version: chart.app_version.clone().unwrap_or_default(),
            cluster_type: outcome.cluster.reported_type().to_string(),
            cluster_version: outcome.cluster.version.clone(),
            upgrade_to_chart_version: outcome.stable_chart.version.clone(),
            upgrade_to_app_version: outcome.stable_chart.app_version.clone().unwrap_or_default(),
            timestamp: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        };
        let path = metadata
            .save(&self.metadata_dir)
            .map_err(|e| Error::test(self.name(), format!("Can't save upgrade metadata: {:#}", e)))?;
        info!("Metadata with upgrade test result saved to '{}'.", path.display());
        Ok(())
    }
}

fn read_stable_chart(file: &Path, origin: &str) -> Result<ChartMetadata> {
    read_chart_archive(file)
        .map_err(|e| Error::test(origin, format!("{:#}", e)))?
        .ok_or_else(|| {
            Error::test(
                origin,
                format!("Couldn't find 'Chart.yaml' in the stable chart '{}'.", file.display()),
            )
        })
}

#[async_trait]
impl Step for UpgradeTestScenario {
    fn name(&self) -> &'static str {
        "UpgradeTestScenario"
    }

    fn steps_provided(&self) -> StepSet {
        step_set(&[STEP_ALL, STEP_UPGRADE])
    }

    fn initialize_config(&self, registry: &mut ConfigRegistry) -> Result<()> {
        self.core.initialize_config(registry)?;
        let url = stable_app_catalog_url_option();
        let file = stable_app_file_option();
        registry.add(url.clone())?;
        registry.add(file.clone())?;
        registry.mutually_exclusive("upgrade-tests-stable-app", &[&url, &file])?;
        registry.add(stable_app_version_option())?;
        registry.add(stable_app_config_file_option())?;
        registry.add(upgrade_hook_option())?;
        registry.add(save_metadata_option())
    }

    async fn pre_run(&mut self, config: &Config) -> Result<()> {
        let origin = self.name();
        self.core.pre_run(config, origin).await?;
        let options = UpgradeOptions::from_config(config);

        match (&options.catalog_url, &options.stable_file) {
            (Some(url), None) => {
                let valid = reqwest::Url::parse(url)
                    .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
                    .unwrap_or(false);
                if !valid {
                    return Err(Error::config(
                        stable_app_catalog_url_option().long(),
                        format!("Wrong catalog URL: '{}'", url),
                    ));
                }
                if options.version.is_empty() {
                    return Err(Error::config(
                        stable_app_version_option().long(),
                        "Version of app to upgrade from can't be empty",
                    ));
                }
            }
            (None, Some(file)) => {
                if !file.is_file() {
                    return Err(Error::config(
                        stable_app_file_option().long(),
                        format!(
                            "Upgrade test from a stable chart in file '{}' was requested, but the file doesn't exist.",
                            file.display()
                        ),
                    ));
                }
            }
            _ => {
                return Err(Error::config(
                    format!(
                        "{},{}",
                        stable_app_catalog_url_option().long(),
                        stable_app_file_option().long()
                    ),
                    "Exactly one of these options must be configured.",
                ));
            }
        }

        if let Some(file) = &options.stable_config_file {
            if !file.is_file() {
                return Err(Error::config(
                    stable_app_config_file_option().long(),
                    format!(
                        "Config file for the app to upgrade from was given, but not found. File name: '{}'.",
                        file.display()
                    ),
                ));
            }
        }

        if let Some(hook) = &options.hook {
            let program = hook.split(' ').find(|w| !w.is_empty()).unwrap_or_default();
            if find_binary(program).is_none() {
                return Err(Error::config(
                    upgrade_hook_option().long(),
                    format!(
                        "Upgrade hook was configured, but '{}' was not found to be a valid executable.",
                        program
                    ),
                ));
            }
        }
        Ok(())
    }

    async fn run(&mut self, config: &Config, context: &mut Context) -> Result<()> {
        let origin = self.name();
        let base = BaseTestOptions::from_config(config)?;
        let options = UpgradeOptions::from_config(config);
        let chart = chart_from_context(context, origin)?;

        let (cluster, connection) = self.core.prepare_cluster(origin).await?;
        connection
            .repository
            .upload(&base.chart_file)
            .await
            .test_err(origin)?;

        let mut created_catalog = None;
        let tested = self
            .upgrade_and_test(
                config,
                context,
                &base,
                &options,
                &chart,
                &connection,
                &cluster,
                &mut created_catalog,
            )
            .await;

        let deleted = delete_deployed_app(&self.core, &connection, context, base.skip_delete, origin).await;
        let catalog_deleted = match &created_catalog {
            Some(catalog) => {
                debug!("Deleting Catalog '{}'.", catalog.name);
                connection
                    .platform
                    .delete_catalog(catalog)
                    .await
                    .test_err(origin)
            }
            None => Ok(()),
        };

        let stable_chart = tested?;
        deleted?;
        catalog_deleted?;

        if options.save_metadata {
            self.save_metadata(
                &chart,
                &UpgradeOutcome {
                    stable_chart,
                    cluster,
                },
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stable_version_from_file_name() {
        assert_eq!(
            stable_version_from_file_name("/tmp/hello-world-app-0.2.3-rc.1.tgz").as_deref(),
            Some("0.2.3-rc.1")
        );
        assert_eq!(stable_version_from_file_name("charts/hello-1.0.0.tgz").as_deref(), Some("1.0.0"));
        assert_eq!(stable_version_from_file_name("hello.tgz"), None);
        assert_eq!(stable_version_from_file_name("charts/hello-10.0.0.tgz").as_deref(), Some("10.0.0"));
        assert_eq!(stable_version_from_file_name("hello-11.2.3.tgz").as_deref(), Some("11.2.3"));
        assert_eq!(
            stable_version_from_file_name("my-charts/hello-2.0.0-rc.1.tgz").as_deref(),
            Some("2.0.0-rc.1")
        );
    }

    #[test]
    fn test_metadata_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = UpgradeMetadata {
            app_name: "myapp".to_string(),
            chart_version: "1.2.3".to_string(),
            app_version: "1.2.3".to_string(),
            cluster_type: "kind".to_string(),
            cluster_version: "v1.29.2".to_string(),
            upgrade_to_chart_version: "1.0.0".to_string(),
            upgrade_to_app_version: "1.0.0".to_string(),
            timestamp: "2024-01-01T00:00:00".to_string(),
        };
        let path = metadata.save(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("myapp-1.0.0-meta").join("tested-upgrade-1.2.3.yaml"));

        let doc: serde_yaml::Value = serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(doc["appName"].as_str(), Some("myapp"));
        assert_eq!(doc["chartVersion"].as_str(), Some("1.2.3"));
        assert_eq!(doc["upgradeToAppVersion"].as_str(), Some("1.0.0"));
        assert_eq!(doc["timestamp"].as_str(), Some("2024-01-01T00:00:00"));
    }
}
