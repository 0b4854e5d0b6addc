//! Scenario-based tests for the test suite pipelines

mod pipeline_phases;
mod simple;
mod upgrade;
