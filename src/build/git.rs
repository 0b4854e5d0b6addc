//! Chart versions derived from git

use crate::build::{BuildOptions, STEP_METADATA};
use crate::chart::{ChartMetadata, CHART_YAML};
use crate::core::{
    assert_binary_present_in_path, step_set, Config, Context, Error, ErrorContext, Result, Step,
    StepSet, STEP_ALL,
};
use crate::execution::{CommandSpec, ProcessRunner};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const GIT_BIN: &str = "git";

/// Replaces `version` and/or `appVersion` in Chart.yaml with `git describe`
///
/// The original Chart.yaml is restored during cleanup.
pub struct HelmGitVersionSetter {
    runner: Arc<dyn ProcessRunner>,
    git: PathBuf,
    original: Option<(PathBuf, String)>,
}

impl HelmGitVersionSetter {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            git: PathBuf::from(GIT_BIN),
            original: None,
        }
    }

    async fn git_version(&self, chart_dir: &Path) -> Result<String> {
        let output = self
            .runner
            .run(
                &CommandSpec::new(self.git.to_string_lossy())
                    .args(["describe", "--tags", "--always"])
                    .cwd(chart_dir),
            )
            .await
            .build_err(self.name())?;
        if !output.success() {
            return Err(Error::build(
                self.name(),
                format!("Can't get version from git: {}", output.combined()),
            ));
        }
        let version = output.stdout.trim();
        Ok(version.strip_prefix('v').unwrap_or(version).to_string())
    }
}

#[async_trait]
impl Step for HelmGitVersionSetter {
    fn steps_provided(&self) -> StepSet {
        step_set(&[STEP_ALL, STEP_METADATA])
    }

    async fn pre_run(&mut self, config: &Config) -> Result<()> {
        let options = BuildOptions::from_config(config);
        if options.replace_chart_version || options.replace_app_version {
            self.git = assert_binary_present_in_path(self.name(), GIT_BIN)?;
        }
        Ok(())
    }

    async fn run(&mut self, config: &Config, _context: &mut Context) -> Result<()> {
        let options = BuildOptions::from_config(config);
        if !options.replace_chart_version && !options.replace_app_version {
            return Ok(());
        }

        let version = self.git_version(&options.chart_dir).await?;
        let path = options.chart_dir.join(CHART_YAML);
        let original = std::fs::read_to_string(&path).build_err(self.name())?;
        let mut chart = ChartMetadata::parse(&original).build_err(self.name())?;
        if options.replace_chart_version {
            info!("Replacing 'version' in Chart.yaml with '{}'.", version);
            chart.set_version(&version);
        }
        if options.replace_app_version {
            info!("Replacing 'appVersion' in Chart.yaml with '{}'.", version);
            chart.set_app_version(&version);
        }
        self.original = Some((path.clone(), original));
        chart.write_to(&path).build_err(self.name())
    }

    async fn cleanup(
        &mut self,
        _config: &Config,
        _context: &mut Context,
        _has_build_failed: bool,
    ) -> Result<()> {
        let Some((path, content)) = self.original.take() else {
            return Ok(());
        };
        info!("Restoring original '{}'.", path.display());
        std::fs::write(&path, content).map_err(|e| {
            warn!("Can't restore '{}': {}", path.display(), e);
            Error::build(self.name(), e.to_string())
        })
    }
}
