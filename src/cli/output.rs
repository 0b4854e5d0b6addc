//! CLI output formatting

use crate::core::{ExecutionStatus, PhaseFailure, RunReport};
use console::Emoji;

pub use console::style;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
    }
}

pub fn format_failure(failure: &PhaseFailure) -> String {
    format!(
        "  {} {} {}: {}",
        CROSS,
        style(failure.phase).dim(),
        style(&failure.step).bold(),
        failure.message
    )
}

/// Final summary of a run
pub fn format_summary(suite: &str, report: &RunReport) -> String {
    let mut lines = Vec::new();
    let icon = if report.is_success() { CHECK } else { CROSS };
    lines.push(format!(
        "{} {} {}",
        icon,
        style(suite).bold(),
        format_status(report.status())
    ));
    lines.extend(report.failures().iter().map(format_failure));
    lines.join("\n")
}

pub fn print_summary(suite: &str, report: &RunReport) {
    println!("\n{}", format_summary(suite, report));
}
