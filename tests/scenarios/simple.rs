//! Test: smoke and functional scenarios

use crate::helpers::*;
use app_suite::core::{Phase, Step};
use app_suite::execution::Runner;
use app_suite::suite::base::BaseTestScenariosPipeline;
use app_suite::suite::catalog::ChartSource;
use app_suite::suite::{build_pipeline_with_executor, suite_info, TestSuiteDeps};
use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    log: CallLog,
    runner: Arc<RecordingRunner>,
    executor: Arc<MockExecutor>,
    created: Arc<std::sync::atomic::AtomicUsize>,
    deleted: Arc<std::sync::atomic::AtomicUsize>,
}

impl Fixture {
    fn new(executor: MockExecutor) -> Self {
        fake_binaries_on_path();
        let dir = tempfile::tempdir().unwrap();
        write_chart_archive(&dir.path().join("hello-1.2.3.tgz"), "hello", "1.2.3", "0.9.0");
        Self {
            log: call_log(),
            runner: Arc::new(RecordingRunner::new()),
            executor: Arc::new(executor),
            created: Default::default(),
            deleted: Default::default(),
            dir,
        }
    }

    fn chart_file(&self) -> String {
        self.dir.path().join("hello-1.2.3.tgz").display().to_string()
    }

    fn pipeline(&mut self) -> BaseTestScenariosPipeline {
        let provider = MockClusterProvider::new(self.dir.path().join("kube.config"));
        self.created = provider.created.clone();
        self.deleted = provider.deleted.clone();
        let chart_source: Arc<dyn ChartSource> = Arc::new(MockChartSource::new(""));
        build_pipeline_with_executor(
            "MockScenariosPipeline",
            self.executor.clone(),
            TestSuiteDeps {
                runner: self.runner.clone(),
                connector: Arc::new(MockConnector::new(self.log.clone())),
                chart_source,
                providers: vec![Box::new(provider)],
            },
        )
    }

    async fn run(&mut self, extra_args: &[&str]) -> app_suite::core::RunReport {
        let pipeline = self.pipeline();
        let chart_file = self.chart_file();
        let mut args = vec!["--chart-file", chart_file.as_str()];
        args.extend_from_slice(extra_args);
        let config = parse_config(&suite_info(), &[&pipeline as &dyn Step], &args);
        let mut runner = Runner::new(vec![Box::new(pipeline)]);
        runner.run(&config).await
    }
}

/// Smoke run deploys from chartmuseum, tests once and deletes the app
#[tokio::test]
async fn test_smoke_deploys_tests_and_deletes() {
    let mut fixture = Fixture::new(MockExecutor::new("tests/ats"));
    let report = fixture
        .run(&["--steps=smoke", "--smoke-tests-cluster-type", "mock"])
        .await;

    assert!(report.is_success(), "{:?}", report.failures());
    assert_eq!(
        calls(&fixture.log),
        vec![
            "upload hello-1.2.3.tgz",
            "create_app hello@1.2.3 from default/chartmuseum to default",
            "wait_running hello@1.2.3",
            "delete_app hello@1.2.3",
            "wait_deleted hello",
        ]
    );

    let runs = fixture.executor.runs.lock().unwrap().clone();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].test_type, "smoke");
    assert_eq!(runs[0].chart_version, "1.2.3");
    assert_eq!(runs[0].cluster_type, "mock");
    assert_eq!(runs[0].cluster_version, "1.29.0");
    assert!(runs[0].kube_config_path.is_absolute());
    assert_eq!(fixture.executor.prepared.load(Ordering::SeqCst), 1);

    let apptestctl = fixture.runner.commands_of("apptestctl");
    assert_eq!(apptestctl.len(), 2);
    assert!(apptestctl[0].ends_with("version"));
    assert!(apptestctl[1].contains("bootstrap --kubeconfig-path="));
    assert!(apptestctl[1].ends_with("--wait"));

    assert_eq!(fixture.created.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.deleted.load(Ordering::SeqCst), 1);
}

/// Failing tests still get the app and the cluster removed
#[tokio::test]
async fn test_app_deleted_when_tests_fail() {
    let mut fixture = Fixture::new(MockExecutor::new("tests/ats").failing());
    let report = fixture
        .run(&["--steps=smoke", "--smoke-tests-cluster-type", "mock"])
        .await;

    assert!(!report.is_success());
    let run_failures: Vec<_> = report.failures_in(Phase::Run).collect();
    assert_eq!(run_failures.len(), 1);
    assert_eq!(run_failures[0].step, "MockScenariosPipeline");
    assert!(run_failures[0].message.contains("tests failed"));

    let log = calls(&fixture.log);
    assert!(log.contains(&"delete_app hello@1.2.3".to_string()));
    assert_eq!(fixture.deleted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_skip_deploy_and_delete() {
    let mut fixture = Fixture::new(MockExecutor::new("tests/ats"));
    let report = fixture
        .run(&[
            "--steps=smoke",
            "--smoke-tests-cluster-type",
            "mock",
            "--app-tests-skip-app-deploy",
            "--app-tests-skip-app-delete",
        ])
        .await;

    assert!(report.is_success(), "{:?}", report.failures());
    assert_eq!(calls(&fixture.log), vec!["upload hello-1.2.3.tgz"]);
    assert_eq!(fixture.executor.runs.lock().unwrap().len(), 1);
}

/// Smoke and functional tests share one cluster, bootstrapped once
#[tokio::test]
async fn test_scenarios_share_cluster() {
    let mut fixture = Fixture::new(MockExecutor::new("tests/ats"));
    let report = fixture
        .run(&[
            "--steps=smoke,functional",
            "--smoke-tests-cluster-type",
            "mock",
            "--functional-tests-cluster-type",
            "mock",
        ])
        .await;

    assert!(report.is_success(), "{:?}", report.failures());
    let test_types: Vec<String> = fixture
        .executor
        .runs
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.test_type.clone())
        .collect();
    assert_eq!(test_types, vec!["smoke", "functional"]);
    assert_eq!(fixture.created.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.deleted.load(Ordering::SeqCst), 1);

    let bootstraps: Vec<String> = fixture
        .runner
        .commands_of("apptestctl")
        .into_iter()
        .filter(|c| c.contains("bootstrap"))
        .collect();
    assert_eq!(bootstraps.len(), 1);
}

#[tokio::test]
async fn test_unknown_cluster_type_fails_pre_run() {
    let mut fixture = Fixture::new(MockExecutor::new("tests/ats"));
    let report = fixture
        .run(&["--steps=smoke", "--smoke-tests-cluster-type", "eks"])
        .await;

    let failures: Vec<_> = report.failures_in(Phase::PreRun).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("Unknown cluster type 'eks'"));
    assert_eq!(report.failures_in(Phase::Run).count(), 0);
    assert!(calls(&fixture.log).is_empty());
    assert_eq!(fixture.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_chart_file_fails_pre_run() {
    let mut fixture = Fixture::new(MockExecutor::new("tests/ats"));
    let pipeline = fixture.pipeline();
    let missing = fixture.dir.path().join("missing.tgz").display().to_string();
    let config = parse_config(
        &suite_info(),
        &[&pipeline as &dyn Step],
        &["--chart-file", &missing, "--steps=smoke", "--smoke-tests-cluster-type", "mock"],
    );
    let mut runner = Runner::new(vec![Box::new(pipeline)]);
    let report = runner.run(&config).await;

    let failures: Vec<_> = report.failures_in(Phase::PreRun).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("chart-file"));
    assert_eq!(fixture.created.load(Ordering::SeqCst), 0);
}

/// A chart without name or version is rejected before anything is deployed
#[tokio::test]
async fn test_chart_without_name_or_version_fails() {
    let mut fixture = Fixture::new(MockExecutor::new("tests/ats"));
    write_chart_archive_with(
        &fixture.dir.path().join("hello-1.2.3.tgz"),
        "hello",
        "apiVersion: v2\ndescription: no name or version\n",
    );
    let report = fixture
        .run(&["--steps=smoke", "--smoke-tests-cluster-type", "mock"])
        .await;

    let failures: Vec<_> = report.failures_in(Phase::Run).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("has no 'name'"), "{}", failures[0].message);
    assert!(calls(&fixture.log).is_empty());
    assert!(fixture.executor.runs.lock().unwrap().is_empty());
    assert_eq!(fixture.deleted.load(Ordering::SeqCst), fixture.created.load(Ordering::SeqCst));
}
