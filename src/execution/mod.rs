//! Execution of pipelines and external processes

pub mod process;
pub mod runner;

pub use process::{CommandSpec, ProcessError, ProcessOutput, ProcessRunner, SubprocessRunner};
pub use runner::Runner;
