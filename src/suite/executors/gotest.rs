//! Tests written in Go, run with `go test`

use crate::core::{Config, ConfigRegistry, Error, ErrorContext, OptionDescriptor, Result};
use crate::execution::{CommandSpec, ProcessRunner};
use crate::suite::base::{dir_has_files_with_extension, dir_next_to_chart, TestExecInfo, TestExecutor};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const GO_BIN: &str = "go";
const NO_MATCHING_FILES: &str = "build constraints exclude all Go files";

pub fn gotest_dir_option() -> OptionDescriptor {
    OptionDescriptor::value(
        "app-tests-gotest-tests-dir",
        "Directory, where go tests source code can be found.",
    )
    .with_default("tests/ats")
}

pub struct GotestExecutor {
    runner: Arc<dyn ProcessRunner>,
}

impl GotestExecutor {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl TestExecutor for GotestExecutor {
    fn name(&self) -> &'static str {
        "Gotest"
    }

    fn initialize_config(&self, registry: &mut ConfigRegistry) -> Result<()> {
        registry.add(gotest_dir_option())
    }

    fn validate(&self, config: &Config, origin: &str) -> Result<PathBuf> {
        let configured = config.value(&gotest_dir_option()).unwrap_or_default();
        let test_dir = dir_next_to_chart(config, &configured);
        if !test_dir.is_dir() {
            return Err(Error::validation(
                origin,
                format!(
                    "Gotest tests were requested, but the configured test source code directory '{}' doesn't exist.",
                    test_dir.display()
                ),
            ));
        }
        if !dir_has_files_with_extension(&test_dir, "go") {
            return Err(Error::validation(
                origin,
                format!(
                    "Gotest tests were requested, but no go source code file was found in directory '{}'.",
                    test_dir.display()
                ),
            ));
        }
        Ok(test_dir)
    }

    async fn execute_test(&self, info: &TestExecInfo) -> Result<()> {
        let command = CommandSpec::new(GO_BIN)
            .args(["test", "-v"])
            .arg(format!("-tags={}", info.test_type))
            .cwd(&info.test_dir)
            .envs(info.env_vars())
            .env("CGO_ENABLED", "0");
        info!("Running {} tool in '{}' directory.", GO_BIN, info.test_dir.display());
        let output = self.runner.run(&command).await.test_err("GotestExecutor")?;

        info!("Command '{}' executed, exit code: {}", command, output.code);
        for line in output.stdout.lines() {
            info!("{}", line);
        }
        for line in output.stderr.lines() {
            info!("{}", line);
        }

        if !output.success() && !output.combined().contains(NO_MATCHING_FILES) {
            return Err(Error::test(
                "GotestExecutor",
                format!(
                    "Gotest tests failed: running '{}' in directory '{}' failed.",
                    command,
                    info.test_dir.display()
                ),
            ));
        }
        Ok(())
    }
}
