//! Runner - drives the lifecycle phases across top-level pipelines

use crate::core::{Config, Context, Phase, RunReport, Step};
use tracing::{debug, error, info};

/// Executes `pre_run`, `run` and `cleanup` across all top-level pipelines
///
/// The three passes run strictly one after another. A failure in one
/// pipeline is logged and recorded, and the remaining pipelines still get
/// their turn. Cleanup is attempted for every selected pipeline.
pub struct Runner {
    pipelines: Vec<Box<dyn Step>>,
    context: Context,
}

impl Runner {
    pub fn new(pipelines: Vec<Box<dyn Step>>) -> Self {
        Self {
            pipelines,
            context: Context::new(),
        }
    }

    /// Context as left behind by the last run
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub async fn run(&mut self, config: &Config) -> RunReport {
        let mut report = RunReport::new();
        self.context = Context::new();

        let selected: Vec<bool> = self
            .pipelines
            .iter_mut()
            .map(|p| p.is_selected(config.selection()))
            .collect();
        let mut ready = selected.clone();

        info!("Running pre-run steps");
        for (index, pipeline) in self.pipelines.iter_mut().enumerate() {
            if !selected[index] {
                debug!("Pipeline {} has no selected steps", pipeline.name());
                continue;
            }
            if let Err(e) = pipeline.pre_run(config).await {
                error!(
                    "Error when running pre-run step for {}: {}",
                    pipeline.name(),
                    e
                );
                report.record(Phase::PreRun, pipeline.name(), e.to_string());
                ready[index] = false;
            }
        }

        info!("Running main steps");
        for (index, pipeline) in self.pipelines.iter_mut().enumerate() {
            if !ready[index] {
                continue;
            }
            if let Err(e) = pipeline.run(config, &mut self.context).await {
                error!(
                    "Error when running run step for {}: {}",
                    pipeline.name(),
                    e
                );
                report.record(Phase::Run, pipeline.name(), e.to_string());
            }
        }

        info!("Running cleanup steps");
        let has_build_failed = !report.is_success();
        for (index, pipeline) in self.pipelines.iter_mut().enumerate() {
            if !selected[index] {
                continue;
            }
            if let Err(e) = pipeline
                .cleanup(config, &mut self.context, has_build_failed)
                .await
            {
                error!(
                    "Error when running cleanup step for {}: {}",
                    pipeline.name(),
                    e
                );
                report.record(Phase::Cleanup, pipeline.name(), e.to_string());
            }
        }

        report
    }
}
