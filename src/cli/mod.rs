//! Command-line driver shared by both suite binaries
//!
//! Both binaries follow the same flow: steps register their options, the
//! configuration is parsed and validated, then the runner executes the
//! pre-run, run and cleanup passes and a summary is printed.

pub mod output;

use crate::core::{ConfigLoadError, ConfigRegistry, OptionDescriptor, Step, SuiteInfo};
use crate::execution::Runner;
use anyhow::{Context, Result};
use output::{print_summary, style, INFO};
use std::ffi::OsString;
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the level picked by `--debug`.
pub fn init_logging(debug: bool) -> Result<()> {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set logging subscriber")
}

/// Register every option of `pipelines` on top of the suite's global options
pub fn build_registry(
    suite: &SuiteInfo,
    extra_options: Vec<OptionDescriptor>,
    pipelines: &[Box<dyn Step>],
) -> crate::core::Result<ConfigRegistry> {
    let mut registry = ConfigRegistry::for_suite(suite)?;
    for option in extra_options {
        registry.add(option)?;
    }
    for pipeline in pipelines {
        pipeline.initialize_config(&mut registry)?;
    }
    Ok(registry)
}

/// Configure and run a suite, returning the process exit code
pub async fn run_suite(
    suite: &SuiteInfo,
    args: Vec<OsString>,
    extra_options: Vec<OptionDescriptor>,
    pipelines: Vec<Box<dyn Step>>,
) -> ExitCode {
    let registry = match build_registry(suite, extra_options, &pipelines) {
        Ok(registry) => registry,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = match registry.parse_from(suite, args) {
        Ok(config) => config,
        Err(ConfigLoadError::Cli(e)) => e.exit(),
        Err(ConfigLoadError::Invalid(e)) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("{} {} {}", INFO, style(suite.name).bold(), style(suite.version).dim());
    if let Some(path) = config.config_file() {
        info!("Using config file '{}'", path.display());
    }
    for (option, value) in config.describe() {
        info!("{}: {}", option, value);
    }

    let mut runner = Runner::new(pipelines);
    let report = runner.run(&config).await;
    print_summary(suite.name, &report);
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
