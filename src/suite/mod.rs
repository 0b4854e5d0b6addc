//! App test suite
//!
//! Tests a packaged chart on one or more clusters. One pipeline is built per
//! run, for the test executor picked with `--test-executor`.

pub mod base;
pub mod catalog;
pub mod executors;
pub mod scenarios;

use crate::cluster::{ClusterManager, ClusterProvider, ExternalClusterProvider, KindClusterProvider};
use crate::core::{
    step_set, ConfigAnchor, OptionDescriptor, Step, StepSet, StepType, SuiteInfo, STEP_ALL,
};
use crate::execution::{ProcessRunner, SubprocessRunner};
use crate::platform::{ClusterConnector, KubectlConnector};
use base::{BaseTestScenariosPipeline, TestExecutor, TestInfoProvider};
use catalog::{ChartSource, HttpChartSource};
use clap::ValueEnum;
use executors::{GotestExecutor, PytestExecutor};
use scenarios::{ScenarioDeps, SimpleTestScenario, UpgradeTestScenario};
use std::sync::Arc;

pub const STEP_SMOKE: StepType = StepType::new("smoke");
pub const STEP_FUNCTIONAL: StepType = StepType::new("functional");
pub const STEP_UPGRADE: StepType = StepType::new("upgrade");
pub const STEP_PERFORMANCE: StepType = StepType::new("performance");
pub const STEP_COMPATIBILITY: StepType = StepType::new("compatibility");

pub fn test_vocabulary() -> StepSet {
    step_set(&[
        STEP_ALL,
        STEP_SMOKE,
        STEP_FUNCTIONAL,
        STEP_UPGRADE,
        STEP_PERFORMANCE,
        STEP_COMPATIBILITY,
    ])
}

pub fn suite_info() -> SuiteInfo {
    SuiteInfo {
        name: "app-test-suite",
        about: "Runs smoke, functional and upgrade tests of a Helm chart on Kubernetes clusters",
        version: env!("CARGO_PKG_VERSION"),
        env_prefix: "ATS_",
        vocabulary: test_vocabulary(),
        config_dir: ".ats",
        config_anchor: ConfigAnchor::ParentOfFile {
            long: "chart-file",
            short: Some('c'),
        },
    }
}

/// Test framework used to run the tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum TestExecutorKind {
    #[default]
    Pytest,
    Gotest,
}

impl TestExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestExecutorKind::Pytest => "pytest",
            TestExecutorKind::Gotest => "gotest",
        }
    }

    /// Parse a `--test-executor` value, case-insensitively
    pub fn parse(value: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(value, true).ok()
    }
}

pub fn test_executor_option() -> OptionDescriptor {
    let names = TestExecutorKind::value_variants()
        .iter()
        .map(TestExecutorKind::as_str);
    OptionDescriptor::value("test-executor", "Test executor used to run the tests.")
        .with_possible_values(names)
        .with_default(TestExecutorKind::default().as_str())
}

/// Collaborators of the test pipelines
pub struct TestSuiteDeps {
    pub runner: Arc<dyn ProcessRunner>,
    pub connector: Arc<dyn ClusterConnector>,
    pub chart_source: Arc<dyn ChartSource>,
    pub providers: Vec<Box<dyn ClusterProvider>>,
}

impl TestSuiteDeps {
    /// Process, kubectl and HTTP backed collaborators
    pub fn system() -> Self {
        let runner: Arc<dyn ProcessRunner> = Arc::new(SubprocessRunner::new());
        Self {
            connector: Arc::new(KubectlConnector::new(runner.clone())),
            chart_source: Arc::new(HttpChartSource::new()),
            providers: vec![
                Box::new(KindClusterProvider::new(runner.clone())),
                Box::new(ExternalClusterProvider::new()),
            ],
            runner,
        }
    }
}

/// Top-level pipeline for the given test executor
pub fn build_pipeline(kind: TestExecutorKind, deps: TestSuiteDeps) -> BaseTestScenariosPipeline {
    let (name, executor): (&'static str, Arc<dyn TestExecutor>) = match kind {
        TestExecutorKind::Pytest => (
            "PytestScenariosPipeline",
            Arc::new(PytestExecutor::new(deps.runner.clone())),
        ),
        TestExecutorKind::Gotest => (
            "GotestScenariosPipeline",
            Arc::new(GotestExecutor::new(deps.runner.clone())),
        ),
    };
    build_pipeline_with_executor(name, executor, deps)
}

/// Top-level pipeline running every scenario with `executor`
pub fn build_pipeline_with_executor(
    name: &'static str,
    executor: Arc<dyn TestExecutor>,
    deps: TestSuiteDeps,
) -> BaseTestScenariosPipeline {
    let cluster_manager = ClusterManager::new(deps.providers).shared();
    let scenario_deps = ScenarioDeps {
        cluster_manager: cluster_manager.clone(),
        executor: executor.clone(),
        connector: deps.connector,
        runner: deps.runner,
    };
    let steps: Vec<Box<dyn Step>> = vec![
        Box::new(TestInfoProvider::new()),
        Box::new(SimpleTestScenario::smoke(scenario_deps.clone())),
        Box::new(SimpleTestScenario::functional(scenario_deps.clone())),
        Box::new(UpgradeTestScenario::new(scenario_deps, deps.chart_source)),
    ];
    BaseTestScenariosPipeline::new(name, steps, cluster_manager, executor)
}
