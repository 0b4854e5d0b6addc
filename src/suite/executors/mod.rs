//! Test executors for the supported test frameworks

pub mod gotest;
pub mod pytest;

pub use gotest::GotestExecutor;
pub use pytest::PytestExecutor;
