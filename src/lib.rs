//! app-suite - build and test suites for Helm chart based apps

pub mod build;
pub mod chart;
pub mod cli;
pub mod cluster;
pub mod core;
pub mod execution;
pub mod platform;
pub mod suite;

// Re-export commonly used types
pub use crate::core::{Config, Context, Error, RunReport, Step, StepType, StepsFilteringPipeline};
pub use crate::execution::Runner;
