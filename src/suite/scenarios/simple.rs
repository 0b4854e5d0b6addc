//! Deploy, test and delete the chart under test

use crate::chart::ChartMetadata;
use crate::core::{
    step_set, Config, ConfigRegistry, Context, Error, ErrorContext, Result, Step, StepSet,
    StepType, CONTEXT_KEY_CHART_YAML, STEP_ALL,
};
use crate::platform::{
    ClusterConnection, ConfiguredApp, CHART_MUSEUM_CATALOG_NAME, CHART_MUSEUM_CATALOG_NAMESPACE,
};
use crate::suite::base::BaseTestOptions;
use crate::suite::scenarios::{ScenarioCore, ScenarioDeps, CONTEXT_KEY_APP};
use crate::suite::{STEP_FUNCTIONAL, STEP_SMOKE};
use async_trait::async_trait;
use tracing::info;

/// Chart metadata stored by `TestInfoProvider`
pub(crate) fn chart_from_context(context: &Context, origin: &str) -> Result<ChartMetadata> {
    context
        .get::<ChartMetadata>(CONTEXT_KEY_CHART_YAML)
        .cloned()
        .ok_or_else(|| Error::test(origin, "Chart metadata is missing from the run context."))
}

/// Delete the app left in the context by a scenario, unless told not to
pub(crate) async fn delete_deployed_app(
    core: &ScenarioCore,
    connection: &ClusterConnection,
    context: &mut Context,
    skip_delete: bool,
    origin: &str,
) -> Result<()> {
    if skip_delete {
        info!("Not deleting the app, as requested by configuration.");
        return Ok(());
    }
    match context.remove::<ConfiguredApp>(CONTEXT_KEY_APP) {
        Some(app) => core.delete_app(connection, &app, origin).await,
        None => Ok(()),
    }
}

/// Smoke or functional test run of the chart under test
pub struct SimpleTestScenario {
    name: &'static str,
    core: ScenarioCore,
}

impl SimpleTestScenario {
    pub fn new(name: &'static str, test_type: StepType, deps: ScenarioDeps) -> Self {
        Self {
            name,
            core: ScenarioCore::new(test_type, deps),
        }
    }

    pub fn smoke(deps: ScenarioDeps) -> Self {
        Self::new("SmokeTestScenario", STEP_SMOKE, deps)
    }

    pub fn functional(deps: ScenarioDeps) -> Self {
        Self::new("FunctionalTestScenario", STEP_FUNCTIONAL, deps)
    }

    async fn deploy_and_test(
        &self,
        config: &Config,
        context: &mut Context,
        options: &BaseTestOptions,
        connection: &ClusterConnection,
        cluster: &crate::cluster::ClusterInfo,
    ) -> Result<()> {
        let chart = chart_from_context(context, self.name)?;
        if options.skip_deploy {
            info!("Skipping app deployment, as requested by configuration.");
        } else {
            let app = self
                .core
                .deploy_chart(
                    connection,
                    &chart.name,
                    &chart.version,
                    &options.deploy_namespace,
                    options.app_config_file.as_deref(),
                    CHART_MUSEUM_CATALOG_NAME,
                    CHART_MUSEUM_CATALOG_NAMESPACE,
                    self.name,
                )
                .await
                .map_err(|e| {
                    Error::test(self.name, format!("Application deployment failed: {}", e.message()))
                })?;
            context.insert(CONTEXT_KEY_APP, app);
        }

        let info = self.core.exec_info(
            cluster,
            options.chart_file.display().to_string(),
            chart.version.clone(),
            options.app_config_file.clone(),
            config.debug(),
        )?;
        self.core.run_tests(&info).await
    }
}

#[async_trait]
impl Step for SimpleTestScenario {
    fn name(&self) -> &'static str {
        self.name
    }

    fn steps_provided(&self) -> StepSet {
        step_set(&[STEP_ALL, self.core.test_type()])
    }

    fn initialize_config(&self, registry: &mut ConfigRegistry) -> Result<()> {
        self.core.initialize_config(registry)
    }

    async fn pre_run(&mut self, config: &Config) -> Result<()> {
        let name = self.name;
        self.core.pre_run(config, name).await
    }

    async fn run(&mut self, config: &Config, context: &mut Context) -> Result<()> {
        let options = BaseTestOptions::from_config(config)?;
        let (cluster, connection) = self.core.prepare_cluster(self.name).await?;

        connection
            .repository
            .upload(&options.chart_file)
            .await
            .test_err(self.name)?;

        let tested = self
            .deploy_and_test(config, context, &options, &connection, &cluster)
            .await;
        let deleted =
            delete_deployed_app(&self.core, &connection, context, options.skip_delete, self.name).await;
        tested.and(deleted)
    }
}
