//! Tests written with pytest, run through `uv`

use crate::core::{find_binary, Config, ConfigRegistry, Error, ErrorContext, OptionDescriptor, Result};
use crate::execution::{CommandSpec, ProcessRunner};
use crate::suite::base::{dir_has_files_with_extension, dir_next_to_chart, TestExecInfo, TestExecutor};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const UV_BIN: &str = "uv";
const PYTEST_BIN: &str = "pytest";
/// pytest exit code for "no tests collected"
const NO_TESTS_COLLECTED: i32 = 5;

pub fn pytest_dir_option() -> OptionDescriptor {
    OptionDescriptor::value(
        "app-tests-pytest-tests-dir",
        "Directory, where pytest tests source code can be found.",
    )
    .with_default("tests/ats")
}

pub struct PytestExecutor {
    runner: Arc<dyn ProcessRunner>,
}

impl PytestExecutor {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl TestExecutor for PytestExecutor {
    fn name(&self) -> &'static str {
        "Pytest"
    }

    fn initialize_config(&self, registry: &mut ConfigRegistry) -> Result<()> {
        registry.add(pytest_dir_option())
    }

    fn validate(&self, config: &Config, origin: &str) -> Result<PathBuf> {
        let configured = config.value(&pytest_dir_option()).unwrap_or_default();
        let test_dir = dir_next_to_chart(config, &configured);
        if !test_dir.is_dir() {
            return Err(Error::validation(
                origin,
                format!(
                    "Pytest tests were requested, but the configured test source code directory '{}' doesn't exist.",
                    test_dir.display()
                ),
            ));
        }
        if !dir_has_files_with_extension(&test_dir, "py") {
            return Err(Error::validation(
                origin,
                format!(
                    "Pytest tests were requested, but no python source code file was found in directory '{}'.",
                    test_dir.display()
                ),
            ));
        }
        if find_binary(UV_BIN).is_none() {
            return Err(Error::validation(
                origin,
                format!("In order to install pytest virtual env, you need to have '{}' installed.", UV_BIN),
            ));
        }
        Ok(test_dir)
    }

    async fn prepare_test_environment(&self, info: &TestExecInfo) -> Result<()> {
        let mut command = CommandSpec::new(UV_BIN)
            .args(["sync", "--frozen"])
            .cwd(&info.test_dir);
        if info.debug {
            command = command.arg("--verbose");
        }
        info!(
            "Running {} tool in '{}' directory to install virtual env for running tests.",
            UV_BIN,
            info.test_dir.display()
        );
        let output = self.runner.run(&command).await.test_err("PytestExecutor")?;
        if !output.success() {
            return Err(Error::test(
                "PytestExecutor",
                format!("Running '{}' in directory '{}' failed.", command, info.test_dir.display()),
            ));
        }
        Ok(())
    }

    async fn execute_test(&self, info: &TestExecInfo) -> Result<()> {
        let command = CommandSpec::new(UV_BIN)
            .args(["run", PYTEST_BIN, "-m", info.test_type.as_str(), "--log-cli-level"])
            .arg(if info.debug { "debug" } else { "info" })
            .arg(format!("--junitxml=test_results_{}.xml", info.test_type))
            .cwd(&info.test_dir)
            .envs(info.env_vars());
        info!("Running {} tool in '{}' directory.", PYTEST_BIN, info.test_dir.display());
        let output = self.runner.run(&command).await.test_err("PytestExecutor")?;
        if output.code != 0 && output.code != NO_TESTS_COLLECTED {
            return Err(Error::test(
                "PytestExecutor",
                format!(
                    "Pytest tests failed: running '{}' in directory '{}' failed.",
                    command,
                    info.test_dir.display()
                ),
            ));
        }
        Ok(())
    }
}
