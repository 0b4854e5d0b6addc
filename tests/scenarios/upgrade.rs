//! Test: upgrade scenario

use crate::helpers::*;
use app_suite::cluster::ClusterManager;
use app_suite::core::{Phase, RunReport, Step};
use app_suite::execution::Runner;
use app_suite::suite::base::{BaseTestScenariosPipeline, TestInfoProvider};
use app_suite::suite::scenarios::{ScenarioDeps, UpgradeTestScenario};
use app_suite::suite::suite_info;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

const CATALOG_URL: &str = "https://charts.example.com/stable/";
const INDEX: &str = r#"
apiVersion: v1
entries:
  hello:
    - version: 1.0.0
    - version: 1.1.0
    - version: 1.1.0-rc.1
  other:
    - version: 9.9.9
"#;

struct Fixture {
    dir: TempDir,
    log: CallLog,
    runner: Arc<RecordingRunner>,
    executor: Arc<MockExecutor>,
    source: Arc<MockChartSource>,
}

impl Fixture {
    fn new() -> Self {
        fake_binaries_on_path();
        let dir = tempfile::tempdir().unwrap();
        write_chart_archive(&dir.path().join("hello-1.2.3.tgz"), "hello", "1.2.3", "0.9.0");
        Self {
            log: call_log(),
            runner: Arc::new(RecordingRunner::new()),
            executor: Arc::new(MockExecutor::new("tests/ats")),
            source: Arc::new(MockChartSource::new(INDEX)),
            dir,
        }
    }

    fn pipeline(&self) -> BaseTestScenariosPipeline {
        let provider = MockClusterProvider::new(self.dir.path().join("kube.config"));
        let cluster_manager = ClusterManager::new(vec![Box::new(provider)]).shared();
        let deps = ScenarioDeps {
            cluster_manager: cluster_manager.clone(),
            executor: self.executor.clone(),
            connector: Arc::new(MockConnector::new(self.log.clone())),
            runner: self.runner.clone(),
        };
        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(TestInfoProvider::new()),
            Box::new(
                UpgradeTestScenario::new(deps, self.source.clone()).with_metadata_dir(self.dir.path()),
            ),
        ];
        BaseTestScenariosPipeline::new(
            "MockScenariosPipeline",
            steps,
            cluster_manager,
            self.executor.clone(),
        )
    }

    async fn run(&self, extra_args: &[&str]) -> RunReport {
        let pipeline = self.pipeline();
        let chart_file = self.dir.path().join("hello-1.2.3.tgz").display().to_string();
        let mut args = vec![
            "--chart-file",
            chart_file.as_str(),
            "--steps=upgrade",
            "--upgrade-tests-cluster-type",
            "mock",
        ];
        args.extend_from_slice(extra_args);
        let config = parse_config(&suite_info(), &[&pipeline as &dyn Step], &args);
        let mut runner = Runner::new(vec![Box::new(pipeline)]);
        runner.run(&config).await
    }
}

/// Upgrade from the latest catalog version, with hooks and metadata
#[tokio::test]
async fn test_upgrade_from_catalog() {
    let fixture = Fixture::new();
    let report = fixture
        .run(&[
            "--upgrade-tests-app-catalog-url",
            CATALOG_URL,
            "--upgrade-tests-upgrade-hook",
            "upgrade-hook",
            "--upgrade-tests-save-metadata",
        ])
        .await;

    assert!(report.is_success(), "{:?}", report.failures());
    assert_eq!(
        calls(&fixture.log),
        vec![
            "upload hello-1.2.3.tgz",
            "create_catalog default/stable https://charts.example.com/stable/",
            "create_app hello@1.1.0 from default/stable to default",
            "wait_running hello@1.1.0",
            "upgrade_app hello@1.1.0 from default/stable to default -> hello@1.2.3 from default/chartmuseum to default",
            "wait_running hello@1.2.3",
            "delete_app hello@1.2.3",
            "wait_deleted hello",
            "delete_catalog default/stable",
        ]
    );
    assert_eq!(*fixture.source.downloads.lock().unwrap(), vec!["hello-1.1.0"]);

    let runs = fixture.executor.runs.lock().unwrap().clone();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].chart_version, "1.1.0");
    assert_eq!(runs[0].chart_path, "https://charts.example.com/stable/hello-1.1.0.tgz");
    assert_eq!(runs[0].extra["STAGE"], "pre-upgrade");
    assert_eq!(runs[1].chart_version, "1.2.3");
    assert_eq!(runs[1].extra["STAGE"], "post-upgrade");
    assert_eq!(runs[1].extra["FROM_VERSION"], "1.1.0");
    assert_eq!(runs[1].extra["TO_VERSION"], "1.2.3");
    assert_eq!(runs[1].env_vars().last().unwrap().0, "ATS_EXTRA_TO_VERSION");

    let hooks = fixture.runner.commands_of("upgrade-hook");
    assert_eq!(hooks.len(), 2);
    assert!(hooks[0].starts_with("upgrade-hook pre-upgrade hello 1.1.0 1.2.3 "));
    assert!(hooks[0].ends_with(" default"));
    assert!(hooks[1].starts_with("upgrade-hook post-upgrade hello 1.1.0 1.2.3 "));

    let metadata_file = fixture
        .dir
        .path()
        .join("hello-1.1.0-meta")
        .join("tested-upgrade-1.2.3.yaml");
    let metadata: serde_yaml::Value =
        serde_yaml::from_str(&std::fs::read_to_string(metadata_file).unwrap()).unwrap();
    assert_eq!(metadata["appName"].as_str(), Some("hello"));
    assert_eq!(metadata["chartVersion"].as_str(), Some("1.2.3"));
    assert_eq!(metadata["appVersion"].as_str(), Some("0.9.0"));
    assert_eq!(metadata["upgradeToChartVersion"].as_str(), Some("1.1.0"));
    assert_eq!(metadata["upgradeToAppVersion"].as_str(), Some("0.1.0"));
    assert_eq!(metadata["clusterType"].as_str(), Some("mock"));
}

/// A stable chart file is uploaded to chartmuseum instead of adding a catalog
#[tokio::test]
async fn test_upgrade_from_file() {
    let fixture = Fixture::new();
    let stable = fixture.dir.path().join("hello-1.0.0.tgz");
    write_chart_archive(&stable, "hello", "1.0.0", "0.8.0");
    let stable = stable.display().to_string();
    let report = fixture.run(&["--upgrade-tests-app-file", &stable]).await;

    assert!(report.is_success(), "{:?}", report.failures());
    let log = calls(&fixture.log);
    assert_eq!(log[0], "upload hello-1.2.3.tgz");
    assert_eq!(log[1], "upload hello-1.0.0.tgz");
    assert_eq!(log[2], "create_app hello@1.0.0 from default/chartmuseum to default");
    assert!(log.iter().all(|call| !call.contains("catalog")));
    assert!(fixture.source.downloads.lock().unwrap().is_empty());
    assert!(!fixture.dir.path().join("hello-1.0.0-meta").exists());
}

/// The stable version comes from the archive's Chart.yaml
#[tokio::test]
async fn test_upgrade_from_file_with_multi_digit_major() {
    let fixture = Fixture::new();
    let stable = fixture.dir.path().join("hello-10.0.0.tgz");
    write_chart_archive(&stable, "hello", "10.0.0", "0.8.0");
    let stable = stable.display().to_string();
    let report = fixture.run(&["--upgrade-tests-app-file", &stable]).await;

    assert!(report.is_success(), "{:?}", report.failures());
    let log = calls(&fixture.log);
    assert_eq!(log[1], "upload hello-10.0.0.tgz");
    assert_eq!(log[2], "create_app hello@10.0.0 from default/chartmuseum to default");
    let runs = fixture.executor.runs.lock().unwrap().clone();
    assert_eq!(runs[0].chart_version, "10.0.0");
    assert_eq!(runs[1].extra["FROM_VERSION"], "10.0.0");
}

#[tokio::test]
async fn test_stable_source_is_required() {
    let fixture = Fixture::new();
    let report = fixture.run(&[]).await;

    let failures: Vec<_> = report.failures_in(Phase::PreRun).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0]
        .message
        .contains("Exactly one of these options must be configured."));
    assert!(calls(&fixture.log).is_empty());
}

#[tokio::test]
async fn test_invalid_catalog_url() {
    let fixture = Fixture::new();
    let report = fixture
        .run(&["--upgrade-tests-app-catalog-url", "ftp://charts.example.com"])
        .await;

    let failures: Vec<_> = report.failures_in(Phase::PreRun).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("Wrong catalog URL"));
}

/// A failing hook aborts the upgrade but the app and catalog are removed
#[tokio::test]
async fn test_failing_hook_still_cleans_up() {
    let fixture = Fixture::new();
    fixture.runner.respond("upgrade-hook", 3, "");
    let report = fixture
        .run(&[
            "--upgrade-tests-app-catalog-url",
            CATALOG_URL,
            "--upgrade-tests-upgrade-hook",
            "upgrade-hook",
        ])
        .await;

    let failures: Vec<_> = report.failures_in(Phase::Run).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0]
        .message
        .contains("Upgrade hook for stage 'pre-upgrade' returned non-zero exit code: '3'."));

    let log = calls(&fixture.log);
    assert!(log.iter().all(|call| !call.starts_with("upgrade_app")));
    assert_eq!(
        &log[log.len() - 3..],
        &[
            "delete_app hello@1.1.0".to_string(),
            "wait_deleted hello".to_string(),
            "delete_catalog default/stable".to_string(),
        ]
    );
    assert_eq!(fixture.executor.runs.lock().unwrap().len(), 1);
}
