//! Test utilities for app-suite
#![allow(dead_code)]

use app_suite::cluster::{ClusterInfo, ClusterManager, ClusterProvider};
use app_suite::core::{
    step_set, Config, ConfigRegistry, Context, Error, Phase, Result, Step, StepSet, StepType,
    SuiteInfo,
};
use app_suite::execution::{CommandSpec, ProcessError, ProcessOutput, ProcessRunner};
use app_suite::platform::{
    AppPlatform, ArtifactRepository, CatalogRef, ClusterConnection, ClusterConnector,
    ConfiguredApp, PlatformError,
};
use app_suite::suite::base::{TestExecInfo, TestExecutor};
use app_suite::suite::catalog::{CatalogError, ChartSource};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

/// Shared, ordered log of calls made to mocks
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Step recording its lifecycle calls, optionally failing in one phase
pub struct RecordingStep {
    name: &'static str,
    provides: StepSet,
    log: CallLog,
    fail_in: Option<Phase>,
}

impl RecordingStep {
    pub fn new(name: &'static str, types: &[StepType], log: CallLog) -> Self {
        Self {
            name,
            provides: step_set(types),
            log,
            fail_in: None,
        }
    }

    pub fn failing_in(mut self, phase: Phase) -> Self {
        self.fail_in = Some(phase);
        self
    }

    fn record(&self, phase: Phase) -> Result<()> {
        self.log.lock().unwrap().push(format!("{}:{}", self.name, phase));
        if self.fail_in == Some(phase) {
            return Err(Error::test(self.name, format!("{} failed", phase)));
        }
        Ok(())
    }
}

#[async_trait]
impl Step for RecordingStep {
    fn name(&self) -> &'static str {
        self.name
    }

    fn steps_provided(&self) -> StepSet {
        self.provides.clone()
    }

    async fn pre_run(&mut self, _config: &Config) -> Result<()> {
        self.record(Phase::PreRun)
    }

    async fn run(&mut self, _config: &Config, _context: &mut Context) -> Result<()> {
        self.record(Phase::Run)
    }

    async fn cleanup(
        &mut self,
        _config: &Config,
        _context: &mut Context,
        _has_build_failed: bool,
    ) -> Result<()> {
        self.record(Phase::Cleanup)
    }
}

/// Process runner returning canned output per program and recording commands
pub struct RecordingRunner {
    commands: Mutex<Vec<CommandSpec>>,
    outputs: Mutex<HashMap<String, ProcessOutput>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        let runner = Self {
            commands: Mutex::new(Vec::new()),
            outputs: Mutex::new(HashMap::new()),
        };
        runner.respond("apptestctl", 0, "Version: 0.14.1\nGit SHA: abcdef\n");
        runner
    }

    /// Output for every call of `program`, matched by file name
    pub fn respond(&self, program: &str, code: i32, stdout: &str) {
        self.outputs.lock().unwrap().insert(
            program.to_string(),
            ProcessOutput {
                code,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.lock().unwrap().clone()
    }

    /// Rendered commands whose program file name is `program`
    pub fn commands_of(&self, program: &str) -> Vec<String> {
        self.commands()
            .iter()
            .filter(|c| program_name(&c.program) == program)
            .map(|c| c.to_string())
            .collect()
    }
}

fn program_name(program: &str) -> String {
    Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(&self, command: &CommandSpec) -> std::result::Result<ProcessOutput, ProcessError> {
        self.commands.lock().unwrap().push(command.clone());
        let output = self
            .outputs
            .lock()
            .unwrap()
            .get(&program_name(&command.program))
            .cloned()
            .unwrap_or_default();
        Ok(output)
    }
}

/// App platform keeping track of App CRs and catalogs
pub struct MockPlatform {
    log: CallLog,
    pub apps: Mutex<Vec<ConfiguredApp>>,
}

impl MockPlatform {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            apps: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, call: String) {
        self.log.lock().unwrap().push(call);
    }
}

fn describe_app(app: &ConfiguredApp) -> String {
    format!(
        "{}@{} from {}/{} to {}{}",
        app.name,
        app.version,
        app.catalog_namespace,
        app.catalog,
        app.target_namespace,
        if app.config_map.is_some() { " with config" } else { "" }
    )
}

#[async_trait]
impl AppPlatform for MockPlatform {
    async fn create_app(
        &self,
        app: &ConfiguredApp,
        _values_file: Option<&Path>,
    ) -> std::result::Result<(), PlatformError> {
        self.record(format!("create_app {}", describe_app(app)));
        self.apps.lock().unwrap().push(app.clone());
        Ok(())
    }

    async fn wait_for_apps_to_run(
        &self,
        apps: &[ConfiguredApp],
        _timeout: Duration,
    ) -> std::result::Result<(), PlatformError> {
        let names: Vec<String> = apps.iter().map(|a| format!("{}@{}", a.name, a.version)).collect();
        self.record(format!("wait_running {}", names.join(",")));
        Ok(())
    }

    async fn delete_app(&self, app: &ConfiguredApp) -> std::result::Result<(), PlatformError> {
        self.record(format!("delete_app {}@{}", app.name, app.version));
        self.apps.lock().unwrap().retain(|a| a.name != app.name);
        Ok(())
    }

    async fn wait_for_app_deleted(
        &self,
        app: &ConfiguredApp,
        _timeout: Duration,
    ) -> std::result::Result<(), PlatformError> {
        self.record(format!("wait_deleted {}", app.name));
        Ok(())
    }

    async fn upgrade_app(
        &self,
        current: &ConfiguredApp,
        target: &ConfiguredApp,
        _values_file: Option<&Path>,
    ) -> std::result::Result<(), PlatformError> {
        self.record(format!(
            "upgrade_app {} -> {}",
            describe_app(current),
            describe_app(target)
        ));
        let mut apps = self.apps.lock().unwrap();
        apps.retain(|a| a.name != current.name);
        apps.push(target.clone());
        Ok(())
    }

    async fn create_catalog(&self, catalog: &CatalogRef) -> std::result::Result<(), PlatformError> {
        self.record(format!("create_catalog {}/{} {}", catalog.namespace, catalog.name, catalog.url));
        Ok(())
    }

    async fn delete_catalog(&self, catalog: &CatalogRef) -> std::result::Result<(), PlatformError> {
        self.record(format!("delete_catalog {}/{}", catalog.namespace, catalog.name));
        Ok(())
    }

    async fn catalog_url(&self, name: &str, namespace: &str) -> std::result::Result<String, PlatformError> {
        Ok(format!("http://{}.{}:8080/charts/", name, namespace))
    }
}

pub struct MockRepository {
    log: CallLog,
}

#[async_trait]
impl ArtifactRepository for MockRepository {
    async fn upload(&self, chart_file: &Path) -> std::result::Result<(), PlatformError> {
        let name = chart_file.file_name().unwrap_or_default().to_string_lossy();
        self.log.lock().unwrap().push(format!("upload {}", name));
        Ok(())
    }
}

/// Connector handing out the same mock platform for every cluster
pub struct MockConnector {
    pub platform: Arc<MockPlatform>,
    pub repository: Arc<MockRepository>,
    pub connects: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(log: CallLog) -> Self {
        Self {
            platform: Arc::new(MockPlatform::new(log.clone())),
            repository: Arc::new(MockRepository { log }),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl ClusterConnector for MockConnector {
    async fn connect(&self, _cluster: &ClusterInfo) -> std::result::Result<ClusterConnection, PlatformError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(ClusterConnection {
            platform: self.platform.clone(),
            repository: self.repository.clone(),
        })
    }
}

pub const MOCK_CLUSTER_TYPE: &str = "mock";

/// Cluster provider counting created and deleted clusters
pub struct MockClusterProvider {
    kube_config_path: PathBuf,
    pub created: Arc<AtomicUsize>,
    pub deleted: Arc<AtomicUsize>,
}

impl MockClusterProvider {
    pub fn new(kube_config_path: impl Into<PathBuf>) -> Self {
        Self {
            kube_config_path: kube_config_path.into(),
            created: Arc::new(AtomicUsize::new(0)),
            deleted: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl ClusterProvider for MockClusterProvider {
    fn provided_cluster_type(&self) -> &'static str {
        MOCK_CLUSTER_TYPE
    }

    async fn get_cluster(&mut self, config_file: Option<&Path>) -> Result<ClusterInfo> {
        let id = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(ClusterInfo {
            cluster_type: MOCK_CLUSTER_TYPE.to_string(),
            overridden_cluster_type: None,
            version: "1.29.0".to_string(),
            cluster_id: format!("mock-{}", id),
            kube_config_path: self.kube_config_path.clone(),
            config_file: config_file.map(Path::to_path_buf),
            app_platform_ready: false,
        })
    }

    async fn delete_cluster(&mut self, _cluster: &ClusterInfo) -> Result<()> {
        self.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn mock_cluster_manager(provider: MockClusterProvider) -> ClusterManager {
    ClusterManager::new(vec![Box::new(provider)])
}

/// Test executor recording every test run
pub struct MockExecutor {
    test_dir: PathBuf,
    pub runs: Arc<Mutex<Vec<TestExecInfo>>>,
    pub prepared: Arc<AtomicUsize>,
    fail: bool,
}

impl MockExecutor {
    pub fn new(test_dir: impl Into<PathBuf>) -> Self {
        Self {
            test_dir: test_dir.into(),
            runs: Arc::new(Mutex::new(Vec::new())),
            prepared: Arc::new(AtomicUsize::new(0)),
            fail: false,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl TestExecutor for MockExecutor {
    fn name(&self) -> &'static str {
        "Mock"
    }

    fn validate(&self, _config: &Config, _origin: &str) -> Result<PathBuf> {
        Ok(self.test_dir.clone())
    }

    async fn prepare_test_environment(&self, _info: &TestExecInfo) -> Result<()> {
        self.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute_test(&self, info: &TestExecInfo) -> Result<()> {
        self.runs.lock().unwrap().push(info.clone());
        if self.fail {
            return Err(Error::test("MockExecutor", "tests failed"));
        }
        Ok(())
    }
}

/// Chart source serving one catalog index and packaging charts on demand
pub struct MockChartSource {
    index: String,
    pub downloads: Arc<Mutex<Vec<String>>>,
}

impl MockChartSource {
    pub fn new(index: &str) -> Self {
        Self {
            index: index.to_string(),
            downloads: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl ChartSource for MockChartSource {
    async fn fetch_index(&self, _catalog_url: &str) -> std::result::Result<String, CatalogError> {
        Ok(self.index.clone())
    }

    async fn download_chart(
        &self,
        _catalog_url: &str,
        app: &str,
        version: &str,
        dest_dir: &Path,
    ) -> std::result::Result<PathBuf, CatalogError> {
        self.downloads.lock().unwrap().push(format!("{}-{}", app, version));
        let path = dest_dir.join("chart.tgz");
        write_chart_archive(&path, app, version, "0.1.0");
        Ok(path)
    }
}

/// Write a `.tgz` containing `<name>/Chart.yaml`
pub fn write_chart_archive(path: &Path, name: &str, version: &str, app_version: &str) {
    let chart_yaml = format!(
        "apiVersion: v2\nname: {}\nversion: {}\nappVersion: {}\n",
        name, version, app_version
    );
    write_chart_archive_with(path, name, &chart_yaml);
}

/// Write a `.tgz` containing `<dir>/Chart.yaml` with the given content
pub fn write_chart_archive_with(path: &Path, dir: &str, chart_yaml: &str) {
    let file = std::fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(chart_yaml.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, format!("{}/Chart.yaml", dir), chart_yaml.as_bytes())
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap();
}

/// Put executables with the given names on `PATH`
///
/// The scripts are never run by the mocks; they only need to be found.
pub fn fake_binaries_on_path() {
    static BIN_DIR: OnceLock<tempfile::TempDir> = OnceLock::new();
    BIN_DIR.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        for name in ["apptestctl", "upgrade-hook"] {
            let path = dir.path().join(name);
            std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            }
        }
        let mut paths = vec![dir.path().to_path_buf()];
        if let Some(current) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&current));
        }
        std::env::set_var("PATH", std::env::join_paths(paths).unwrap());
        dir
    });
}

/// Parse `args` against the options registered by `steps`
pub fn parse_config(suite: &SuiteInfo, steps: &[&dyn Step], args: &[&str]) -> Config {
    let mut registry = ConfigRegistry::for_suite(suite).unwrap();
    for step in steps {
        step.initialize_config(&mut registry).unwrap();
    }
    let mut argv: Vec<OsString> = vec![OsString::from(suite.name)];
    argv.extend(args.iter().map(OsString::from));
    registry.parse_from(suite, argv).unwrap()
}
