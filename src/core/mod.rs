//! Core domain models for the step engine
//!
//! This module defines step types, the step trait, the filtering pipeline,
//! the run context and the configuration layer shared by both suites.

pub mod config;
pub mod context;
pub mod errors;
pub mod pipeline;
pub mod state;
pub mod step;
pub mod step_type;

pub use config::{
    debug_option, pre_scan, pre_scan_flag, skip_steps_option, steps_option, Config, ConfigAnchor,
    ConfigLoadError, ConfigRegistry, OptionDescriptor, OptionKind, SuiteInfo,
};
pub use context::*;
pub use errors::{Error, ErrorContext, Result};
pub use pipeline::*;
pub use state::*;
pub use step::*;
pub use step_type::*;
