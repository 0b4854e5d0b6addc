use app_suite::cli;
use app_suite::core::{debug_option, pre_scan, pre_scan_flag, Step};
use app_suite::suite::{
    build_pipeline, suite_info, test_executor_option, TestExecutorKind, TestSuiteDeps,
};
use std::ffi::OsString;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<OsString> = std::env::args_os().collect();
    let suite = suite_info();

    if let Err(e) = cli::init_logging(pre_scan_flag(&suite, &args, &debug_option())) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    // Invalid values fall back to the default here and are rejected by clap
    let kind = pre_scan(&suite, &args, &test_executor_option())
        .and_then(|value| TestExecutorKind::parse(&value))
        .unwrap_or_default();

    let pipelines: Vec<Box<dyn Step>> = vec![Box::new(build_pipeline(kind, TestSuiteDeps::system()))];
    cli::run_suite(&suite, args, vec![test_executor_option()], pipelines).await
}
