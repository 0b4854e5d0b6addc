use app_suite::build::{suite_info, HelmBuildPipeline};
use app_suite::cli;
use app_suite::core::{debug_option, pre_scan_flag, Step};
use app_suite::execution::SubprocessRunner;
use std::ffi::OsString;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<OsString> = std::env::args_os().collect();
    let suite = suite_info();

    if let Err(e) = cli::init_logging(pre_scan_flag(&suite, &args, &debug_option())) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    let runner = Arc::new(SubprocessRunner::new());
    let pipelines: Vec<Box<dyn Step>> = vec![Box::new(HelmBuildPipeline::new(runner))];
    cli::run_suite(&suite, args, Vec::new(), pipelines).await
}
