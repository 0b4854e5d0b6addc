//! Execution state models

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    PreRun,
    Run,
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::PreRun => "pre-run",
            Phase::Run => "run",
            Phase::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Overall execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Every phase finished without errors
    Completed,
    /// At least one phase reported an error
    Failed,
}

/// A single failure recorded by the runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseFailure {
    pub phase: Phase,
    pub step: String,
    pub message: String,
}

/// Outcome of a whole run, collected across all phases
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    failures: Vec<PhaseFailure>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, phase: Phase, step: impl Into<String>, message: impl Into<String>) {
        self.failures.push(PhaseFailure {
            phase,
            step: step.into(),
            message: message.into(),
        });
    }

    pub fn failures(&self) -> &[PhaseFailure] {
        &self.failures
    }

    pub fn failures_in(&self, phase: Phase) -> impl Iterator<Item = &PhaseFailure> {
        self.failures.iter().filter(move |f| f.phase == phase)
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn status(&self) -> ExecutionStatus {
        if self.is_success() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        }
    }
}
