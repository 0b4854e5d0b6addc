//! Filtering pipeline - an ordered composite of steps

use crate::core::{
    config::{Config, ConfigRegistry},
    context::Context,
    errors::{Error, Result},
    state::Phase,
    step::Step,
    step_type::{Selection, StepSet},
};
use async_trait::async_trait;
use tracing::{debug, error, info};

/// Ordered collection of steps that filters itself against the selection
///
/// The active subset is computed once, the first time it is needed, and never
/// changes afterwards. Lifecycle calls are forwarded to active children in
/// registration order.
pub struct StepsFilteringPipeline {
    group: String,
    steps: Vec<Box<dyn Step>>,
    active: Option<Vec<bool>>,
    attempted: Vec<bool>,
    all_pre_runs_skipped: bool,
}

impl StepsFilteringPipeline {
    /// Create a pipeline registering its options under `group`
    pub fn new(group: impl Into<String>, steps: Vec<Box<dyn Step>>) -> Self {
        let attempted = vec![false; steps.len()];
        Self {
            group: group.into(),
            steps,
            active: None,
            attempted,
            all_pre_runs_skipped: false,
        }
    }

    /// Config group name
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn steps(&self) -> &[Box<dyn Step>] {
        &self.steps
    }

    /// True when no child was active during `pre_run`
    pub fn all_pre_runs_skipped(&self) -> bool {
        self.all_pre_runs_skipped
    }

    /// Names of the children taking part in a run with `selection`
    pub fn active_step_names(&mut self, selection: &Selection) -> Vec<&'static str> {
        let active = self.ensure_active(selection);
        self.steps
            .iter()
            .zip(active)
            .filter(|(_, active)| *active)
            .map(|(step, _)| step.name())
            .collect()
    }

    fn ensure_active(&mut self, selection: &Selection) -> Vec<bool> {
        if let Some(active) = &self.active {
            return active.clone();
        }
        let active: Vec<bool> = self
            .steps
            .iter_mut()
            .map(|step| step.is_selected(selection))
            .collect();
        for (step, active) in self.steps.iter().zip(&active) {
            if !active {
                debug!("Step {} is not selected and will be skipped", step.name());
            }
        }
        self.active = Some(active.clone());
        active
    }
}

#[async_trait]
impl Step for StepsFilteringPipeline {
    fn steps_provided(&self) -> StepSet {
        self.steps
            .iter()
            .flat_map(|step| step.steps_provided())
            .collect()
    }

    fn initialize_config(&self, registry: &mut ConfigRegistry) -> Result<()> {
        for step in &self.steps {
            registry.set_heading(self.group.clone());
            step.initialize_config(registry)?;
        }
        registry.set_heading(self.group.clone());
        Ok(())
    }

    fn is_selected(&mut self, selection: &Selection) -> bool {
        self.ensure_active(selection).into_iter().any(|a| a)
    }

    async fn pre_run(&mut self, config: &Config) -> Result<()> {
        let active = self.ensure_active(config.selection());
        self.all_pre_runs_skipped = !active.iter().any(|a| *a);

        for (index, step) in self.steps.iter_mut().enumerate() {
            if !active[index] {
                continue;
            }
            self.attempted[index] = true;
            info!("Running pre-run step for {}", step.name());
            step.pre_run(config).await?;
        }
        Ok(())
    }

    async fn run(&mut self, config: &Config, context: &mut Context) -> Result<()> {
        let active = self.ensure_active(config.selection());
        for (index, step) in self.steps.iter_mut().enumerate() {
            if !active[index] || !self.attempted[index] {
                continue;
            }
            info!("Running step {}", step.name());
            step.run(config, context).await?;
        }
        Ok(())
    }

    async fn cleanup(
        &mut self,
        config: &Config,
        context: &mut Context,
        has_build_failed: bool,
    ) -> Result<()> {
        let mut failed = Vec::new();
        for (index, step) in self.steps.iter_mut().enumerate() {
            if !self.attempted[index] {
                continue;
            }
            info!("Running cleanup for {}", step.name());
            if let Err(e) = step.cleanup(config, context, has_build_failed).await {
                error!("Error when running cleanup for {}: {}", step.name(), e.message());
                failed.push(step.name().to_string());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::StepsFailed {
                phase: Phase::Cleanup,
                failed,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::step_type::{step_set, StepType, STEP_ALL};

    const BUILD: StepType = StepType::new("build");
    const LINT: StepType = StepType::new("lint");

    struct Tagged(StepSet);

    #[async_trait]
    impl Step for Tagged {
        fn steps_provided(&self) -> StepSet {
            self.0.clone()
        }

        async fn run(&mut self, _config: &Config, _context: &mut Context) -> Result<()> {
            Ok(())
        }
    }

    fn pipeline() -> StepsFilteringPipeline {
        StepsFilteringPipeline::new(
            "Unit",
            vec![
                Box::new(Tagged(step_set(&[STEP_ALL]))),
                Box::new(Tagged(step_set(&[STEP_ALL, BUILD]))),
                Box::new(Tagged(step_set(&[STEP_ALL, LINT]))),
            ],
        )
    }

    #[test]
    fn test_steps_provided_is_union() {
        assert_eq!(pipeline().steps_provided(), step_set(&[STEP_ALL, BUILD, LINT]));
    }

    #[test]
    fn test_active_subset_is_cached() {
        let mut pipeline = pipeline();
        assert_eq!(pipeline.active_step_names(&Selection::include([LINT])).len(), 2);
        // A different selection later does not change the cached subset
        assert_eq!(pipeline.active_step_names(&Selection::all()).len(), 2);
    }

    #[test]
    fn test_nested_pipeline_selected_if_any_child_is() {
        let mut nested = StepsFilteringPipeline::new(
            "Nested",
            vec![Box::new(Tagged(step_set(&[STEP_ALL, BUILD])))],
        );
        assert!(!nested.is_selected(&Selection::include([LINT])));

        let mut nested = StepsFilteringPipeline::new(
            "Nested",
            vec![Box::new(Tagged(step_set(&[STEP_ALL, BUILD])))],
        );
        assert!(nested.is_selected(&Selection::include([BUILD])));
    }
}
