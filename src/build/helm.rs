//! Helm based build steps

use crate::build::{BuildOptions, STEP_BUILD, STEP_STATIC_CHECK, STEP_VALIDATE};
use crate::chart::{ChartMetadata, CHART_YAML};
use crate::core::{
    assert_binary_present_in_path, assert_version_in_range, step_set, Config, Context, Error,
    ErrorContext, Result, Step, StepSet, CONTEXT_KEY_CHART_FILE, CONTEXT_KEY_CHART_YAML, STEP_ALL,
};
use crate::execution::{CommandSpec, ProcessRunner};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const HELM_BIN: &str = "helm";
const HELM_MIN_VERSION: &str = "3.2.0";
const HELM_MAX_VERSION: &str = "4.0.0";
const PACKAGED_PREFIX: &str = "Successfully packaged chart and saved it to:";

/// Locate `helm` and check its version
async fn find_helm(runner: &dyn ProcessRunner, origin: &str) -> Result<PathBuf> {
    let helm = assert_binary_present_in_path(origin, HELM_BIN)?;
    let output = runner
        .run(
            &CommandSpec::new(helm.to_string_lossy())
                .arg("version")
                .arg("--template={{.Version}}"),
        )
        .await
        .validation_err(origin)?;
    assert_version_in_range(
        origin,
        HELM_BIN,
        output.stdout.trim(),
        HELM_MIN_VERSION,
        HELM_MAX_VERSION,
    )?;
    Ok(helm)
}

/// Checks Chart.yaml and publishes it in the context
#[derive(Debug, Default)]
pub struct HelmChartValidator;

impl HelmChartValidator {
    pub fn new() -> Self {
        Self
    }

    fn validate(&self, chart: &ChartMetadata) -> Result<()> {
        match chart.api_version.as_deref() {
            Some("v1") | Some("v2") => {}
            other => {
                return Err(Error::validation(
                    self.name(),
                    format!("Unsupported Chart.yaml apiVersion '{}'.", other.unwrap_or_default()),
                ))
            }
        }
        if chart.name.trim().is_empty() {
            return Err(Error::validation(self.name(), "Chart name can't be empty."));
        }
        semver::Version::parse(&chart.version).map_err(|e| {
            Error::validation(
                self.name(),
                format!("Chart version '{}' is not a valid semantic version: {}", chart.version, e),
            )
        })?;
        Ok(())
    }
}

#[async_trait]
impl Step for HelmChartValidator {
    fn steps_provided(&self) -> StepSet {
        step_set(&[STEP_ALL, STEP_VALIDATE])
    }

    async fn run(&mut self, config: &Config, context: &mut Context) -> Result<()> {
        let options = BuildOptions::from_config(config);
        let path = options.chart_dir.join(CHART_YAML);
        if !path.is_file() {
            return Err(Error::validation(
                self.name(),
                format!("Can't find '{}'.", path.display()),
            ));
        }
        let chart = ChartMetadata::from_file(&path).validation_err(self.name())?;
        self.validate(&chart)?;
        info!("Chart {} version {} is valid.", chart.name, chart.version);
        context.insert(CONTEXT_KEY_CHART_YAML, chart);
        Ok(())
    }
}

/// Runs `helm lint`
pub struct HelmLinter {
    runner: Arc<dyn ProcessRunner>,
    helm: PathBuf,
}

impl HelmLinter {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            helm: PathBuf::from(HELM_BIN),
        }
    }
}

#[async_trait]
impl Step for HelmLinter {
    fn steps_provided(&self) -> StepSet {
        step_set(&[STEP_ALL, STEP_STATIC_CHECK])
    }

    async fn pre_run(&mut self, _config: &Config) -> Result<()> {
        self.helm = find_helm(self.runner.as_ref(), self.name()).await?;
        Ok(())
    }

    async fn run(&mut self, config: &Config, _context: &mut Context) -> Result<()> {
        let options = BuildOptions::from_config(config);
        info!("Running helm lint on '{}'.", options.chart_dir.display());
        let output = self
            .runner
            .run(
                &CommandSpec::new(self.helm.to_string_lossy())
                    .arg("lint")
                    .arg(options.chart_dir.to_string_lossy()),
            )
            .await
            .build_err(self.name())?;
        if !output.success() {
            return Err(Error::build(
                self.name(),
                format!("Linting chart failed: {}", output.combined()),
            ));
        }
        Ok(())
    }
}

/// Runs `helm package`
pub struct HelmChartBuilder {
    runner: Arc<dyn ProcessRunner>,
    helm: PathBuf,
}

impl HelmChartBuilder {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            helm: PathBuf::from(HELM_BIN),
        }
    }
}

/// Archive path reported by `helm package`
fn packaged_chart_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix(PACKAGED_PREFIX))
        .map(|path| PathBuf::from(path.trim()))
}

fn expected_chart_path(destination: &Path, context: &Context) -> Option<PathBuf> {
    context
        .get::<ChartMetadata>(CONTEXT_KEY_CHART_YAML)
        .map(|chart| destination.join(format!("{}-{}.tgz", chart.name, chart.version)))
}

#[async_trait]
impl Step for HelmChartBuilder {
    fn steps_provided(&self) -> StepSet {
        step_set(&[STEP_ALL, STEP_BUILD])
    }

    async fn pre_run(&mut self, _config: &Config) -> Result<()> {
        self.helm = find_helm(self.runner.as_ref(), self.name()).await?;
        Ok(())
    }

    async fn run(&mut self, config: &Config, context: &mut Context) -> Result<()> {
        let options = BuildOptions::from_config(config);
        std::fs::create_dir_all(&options.destination).build_err(self.name())?;
        info!(
            "Packaging chart '{}' to '{}'.",
            options.chart_dir.display(),
            options.destination.display()
        );
        let output = self
            .runner
            .run(
                &CommandSpec::new(self.helm.to_string_lossy())
                    .arg("package")
                    .arg(options.chart_dir.to_string_lossy())
                    .arg("--destination")
                    .arg(options.destination.to_string_lossy()),
            )
            .await
            .build_err(self.name())?;
        if !output.success() {
            return Err(Error::build(
                self.name(),
                format!("Packaging chart failed: {}", output.combined()),
            ));
        }

        let chart_file = packaged_chart_path(&output.stdout)
            .or_else(|| expected_chart_path(&options.destination, context))
            .ok_or_else(|| Error::build(self.name(), "Can't find the packaged chart archive."))?;
        debug!("Chart packaged to '{}'", chart_file.display());
        context.insert(CONTEXT_KEY_CHART_FILE, chart_file);
        Ok(())
    }
}
