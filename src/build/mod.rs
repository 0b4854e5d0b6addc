//! App build suite
//!
//! Validates, versions, lints and packages a Helm chart directory.

pub mod git;
pub mod helm;

use crate::core::{
    step_set, Config, ConfigAnchor, ConfigRegistry, Context, Error, OptionDescriptor, Result,
    Selection, Step, StepSet, StepType, StepsFilteringPipeline, SuiteInfo, STEP_ALL,
};
use crate::execution::ProcessRunner;
use async_trait::async_trait;
use git::HelmGitVersionSetter;
use helm::{HelmChartBuilder, HelmChartValidator, HelmLinter};
use std::path::PathBuf;
use std::sync::Arc;

pub const STEP_BUILD: StepType = StepType::new("build");
pub const STEP_METADATA: StepType = StepType::new("metadata");
pub const STEP_VALIDATE: StepType = StepType::new("validate");
pub const STEP_STATIC_CHECK: StepType = StepType::new("static_check");

pub const HELM_OPTIONS_GROUP: &str = "Helm chart build options";

pub fn build_vocabulary() -> StepSet {
    step_set(&[STEP_ALL, STEP_BUILD, STEP_METADATA, STEP_VALIDATE, STEP_STATIC_CHECK])
}

pub fn suite_info() -> SuiteInfo {
    SuiteInfo {
        name: "app-build-suite",
        about: "Validates, lints and packages Helm charts",
        version: env!("CARGO_PKG_VERSION"),
        env_prefix: "ABS_",
        vocabulary: build_vocabulary(),
        config_dir: ".abs",
        config_anchor: ConfigAnchor::Directory {
            long: "chart-dir",
            short: Some('c'),
        },
    }
}

pub fn chart_dir_option() -> OptionDescriptor {
    OptionDescriptor::value("chart-dir", "Path to the Helm Chart to build.")
        .with_short('c')
        .with_default(".")
}

pub fn destination_option() -> OptionDescriptor {
    OptionDescriptor::value("destination", "Path of a directory to store the packaged tgz.")
        .with_default(".")
}

pub fn replace_chart_version_option() -> OptionDescriptor {
    OptionDescriptor::flag(
        "replace-chart-version-with-git",
        "Should the chart version in Chart.yaml be replaced with a tag and commit based version.",
    )
}

pub fn replace_app_version_option() -> OptionDescriptor {
    OptionDescriptor::flag(
        "replace-app-version-with-git",
        "Should the appVersion in Chart.yaml be replaced with a tag and commit based version.",
    )
}

/// Build options read back from a [`Config`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub chart_dir: PathBuf,
    pub destination: PathBuf,
    pub replace_chart_version: bool,
    pub replace_app_version: bool,
}

impl BuildOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chart_dir: config.path(&chart_dir_option()).unwrap_or_else(|| PathBuf::from(".")),
            destination: config
                .path(&destination_option())
                .unwrap_or_else(|| PathBuf::from(".")),
            replace_chart_version: config.flag(&replace_chart_version_option()),
            replace_app_version: config.flag(&replace_app_version_option()),
        }
    }
}

/// Helm chart build pipeline
pub struct HelmBuildPipeline {
    pipeline: StepsFilteringPipeline,
}

impl HelmBuildPipeline {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(HelmGitVersionSetter::new(runner.clone())),
            Box::new(HelmChartValidator::new()),
            Box::new(HelmLinter::new(runner.clone())),
            Box::new(HelmChartBuilder::new(runner)),
        ];
        Self::with_steps(steps)
    }

    pub fn with_steps(steps: Vec<Box<dyn Step>>) -> Self {
        Self {
            pipeline: StepsFilteringPipeline::new(HELM_OPTIONS_GROUP, steps),
        }
    }
}

#[async_trait]
impl Step for HelmBuildPipeline {
    fn steps_provided(&self) -> StepSet {
        self.pipeline.steps_provided()
    }

    fn initialize_config(&self, registry: &mut ConfigRegistry) -> Result<()> {
        registry.set_heading(HELM_OPTIONS_GROUP);
        registry.add(chart_dir_option())?;
        registry.add(destination_option())?;
        registry.add(replace_chart_version_option())?;
        registry.add(replace_app_version_option())?;
        self.pipeline.initialize_config(registry)
    }

    fn is_selected(&mut self, selection: &Selection) -> bool {
        self.pipeline.is_selected(selection)
    }

    async fn pre_run(&mut self, config: &Config) -> Result<()> {
        let options = BuildOptions::from_config(config);
        if !options.chart_dir.is_dir() {
            return Err(Error::config(
                chart_dir_option().long(),
                format!("Chart directory '{}' doesn't exist.", options.chart_dir.display()),
            ));
        }
        self.pipeline.pre_run(config).await
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
        self.pipeline.cleanup(config, context, has_build_failed).await
    }
}
