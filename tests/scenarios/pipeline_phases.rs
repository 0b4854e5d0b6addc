//! Test: step filtering and lifecycle phases across pipelines

use crate::helpers::*;
use app_suite::build::{suite_info, STEP_BUILD, STEP_STATIC_CHECK, STEP_VALIDATE};
use app_suite::core::{Phase, Step, StepsFilteringPipeline, STEP_ALL};
use app_suite::execution::Runner;
use pretty_assertions::assert_eq;

fn three_steps(log: &CallLog) -> Vec<RecordingStep> {
    vec![
        RecordingStep::new("Validate", &[STEP_ALL, STEP_VALIDATE], log.clone()),
        RecordingStep::new("Build", &[STEP_ALL, STEP_BUILD], log.clone()),
        RecordingStep::new("Lint", &[STEP_ALL, STEP_STATIC_CHECK], log.clone()),
    ]
}

fn pipeline(steps: Vec<RecordingStep>) -> Box<dyn Step> {
    Box::new(StepsFilteringPipeline::new(
        "Test",
        steps.into_iter().map(|s| Box::new(s) as Box<dyn Step>).collect(),
    ))
}

#[tokio::test]
async fn test_selected_steps_run_in_order() {
    let log = call_log();
    let config = parse_config(&suite_info(), &[], &["--steps=static_check,validate"]);
    let mut runner = Runner::new(vec![pipeline(three_steps(&log))]);
    let report = runner.run(&config).await;

    assert!(report.is_success());
    assert_eq!(
        calls(&log),
        vec![
            "Validate:pre-run",
            "Lint:pre-run",
            "Validate:run",
            "Lint:run",
            "Validate:cleanup",
            "Lint:cleanup",
        ]
    );
}

#[tokio::test]
async fn test_skip_steps() {
    let log = call_log();
    let config = parse_config(&suite_info(), &[], &["--skip-steps=build"]);
    let mut runner = Runner::new(vec![pipeline(three_steps(&log))]);
    runner.run(&config).await;

    assert!(calls(&log).iter().all(|call| !call.starts_with("Build")));
    assert_eq!(calls(&log).len(), 6);
}

/// A failing step stops its pipeline but every attempted step is cleaned up
#[tokio::test]
async fn test_run_failure_stops_pipeline() {
    let log = call_log();
    let mut steps = three_steps(&log);
    steps[1] = RecordingStep::new("Build", &[STEP_ALL, STEP_BUILD], log.clone()).failing_in(Phase::Run);
    let config = parse_config(&suite_info(), &[], &[]);
    let mut runner = Runner::new(vec![pipeline(steps)]);
    let report = runner.run(&config).await;

    assert_eq!(report.failures_in(Phase::Run).count(), 1);
    let log = calls(&log);
    assert!(!log.contains(&"Lint:run".to_string()));
    assert_eq!(
        &log[log.len() - 3..],
        &["Validate:cleanup", "Build:cleanup", "Lint:cleanup"]
    );
}

/// A pre-run failure skips the pipeline's run, other pipelines carry on
#[tokio::test]
async fn test_pre_run_failure_isolated_to_pipeline() {
    let log = call_log();
    let first = vec![
        RecordingStep::new("A1", &[STEP_ALL, STEP_BUILD], log.clone()).failing_in(Phase::PreRun),
        RecordingStep::new("A2", &[STEP_ALL, STEP_BUILD], log.clone()),
    ];
    let second = vec![RecordingStep::new("B1", &[STEP_ALL, STEP_BUILD], log.clone())];
    let config = parse_config(&suite_info(), &[], &[]);
    let mut runner = Runner::new(vec![pipeline(first), pipeline(second)]);
    let report = runner.run(&config).await;

    assert_eq!(report.failures().len(), 1);
    assert_eq!(report.failures()[0].phase, Phase::PreRun);
    assert_eq!(
        calls(&log),
        vec!["A1:pre-run", "B1:pre-run", "B1:run", "A1:cleanup", "B1:cleanup"]
    );
}

/// A run failure in one pipeline doesn't skip the next pipeline's run
#[tokio::test]
async fn test_run_failure_isolated_to_pipeline() {
    let log = call_log();
    let first = vec![RecordingStep::new("A1", &[STEP_ALL, STEP_BUILD], log.clone()).failing_in(Phase::Run)];
    let second = vec![RecordingStep::new("B1", &[STEP_ALL, STEP_BUILD], log.clone())];
    let config = parse_config(&suite_info(), &[], &[]);
    let mut runner = Runner::new(vec![pipeline(first), pipeline(second)]);
    let report = runner.run(&config).await;

    assert_eq!(report.failures().len(), 1);
    assert_eq!(report.failures()[0].phase, Phase::Run);
    assert_eq!(
        calls(&log),
        vec![
            "A1:pre-run",
            "B1:pre-run",
            "A1:run",
            "B1:run",
            "A1:cleanup",
            "B1:cleanup",
        ]
    );
}

#[tokio::test]
async fn test_cleanup_failures_do_not_stop_cleanup() {
    let log = call_log();
    let steps = vec![
        RecordingStep::new("First", &[STEP_ALL], log.clone()).failing_in(Phase::Cleanup),
        RecordingStep::new("Second", &[STEP_ALL], log.clone()),
    ];
    let config = parse_config(&suite_info(), &[], &[]);
    let mut runner = Runner::new(vec![pipeline(steps)]);
    let report = runner.run(&config).await;

    let failures: Vec<_> = report.failures_in(Phase::Cleanup).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("First"));
    assert!(calls(&log).contains(&"Second:cleanup".to_string()));
}

#[tokio::test]
async fn test_unselected_pipeline_is_untouched() {
    let log = call_log();
    let lint_only = vec![RecordingStep::new("Lint", &[STEP_ALL, STEP_STATIC_CHECK], log.clone())];
    let config = parse_config(&suite_info(), &[], &["--steps=build"]);
    let mut runner = Runner::new(vec![pipeline(lint_only)]);
    let report = runner.run(&config).await;

    assert!(report.is_success());
    assert!(calls(&log).is_empty());
}
