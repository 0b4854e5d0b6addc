//! Step domain model
//!
//! A step is the atomic unit of work. It declares which step types it
//! provides and goes through a fixed lifecycle: `initialize_config` before
//! parsing, then `pre_run`, `run` and `cleanup`.

use crate::core::{
    config::{Config, ConfigRegistry},
    context::Context,
    errors::{Error, Result},
    step_type::{Selection, StepSet},
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// A single unit of work in a pipeline
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable name used in logs and errors
    ///
    /// Defaults to the name of the implementing type.
    fn name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Step types this step can execute
    fn steps_provided(&self) -> StepSet;

    /// Register command line and config file options
    fn initialize_config(&self, _registry: &mut ConfigRegistry) -> Result<()> {
        Ok(())
    }

    /// Whether this step takes part in a run with the given selection
    fn is_selected(&mut self, selection: &Selection) -> bool {
        selection.selects(&self.steps_provided())
    }

    /// Validate configuration and environment before any work starts
    async fn pre_run(&mut self, _config: &Config) -> Result<()> {
        Ok(())
    }

    /// Do the actual work
    async fn run(&mut self, config: &Config, context: &mut Context) -> Result<()>;

    /// Best-effort teardown
    ///
    /// Called even if `pre_run` or `run` failed or never completed.
    async fn cleanup(
        &mut self,
        _config: &Config,
        _context: &mut Context,
        _has_build_failed: bool,
    ) -> Result<()> {
        Ok(())
    }
}

/// Last path segment of a type name, without generic arguments
pub fn short_type_name(full: &'static str) -> &'static str {
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics.rsplit("::").next().unwrap_or(without_generics)
}

/// Find an executable by path or on `PATH`
pub fn find_binary(binary: &str) -> Option<PathBuf> {
    let candidate = Path::new(binary);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(binary))
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Fail with a validation error unless `binary` can be found
pub fn assert_binary_present_in_path(origin: &str, binary: &str) -> Result<PathBuf> {
    find_binary(binary).ok_or_else(|| {
        Error::validation(
            origin,
            format!("Can't find '{}' executable. Please make sure it's installed.", binary),
        )
    })
}

/// Fail with a validation error unless `min <= version < max_exclusive`
///
/// A leading `v` in `version` is ignored.
pub fn assert_version_in_range(
    origin: &str,
    binary: &str,
    version: &str,
    min: &str,
    max_exclusive: &str,
) -> Result<()> {
    let parse = |v: &str| {
        semver::Version::parse(v.trim().trim_start_matches('v')).map_err(|e| {
            Error::validation(
                origin,
                format!("Can't parse '{}' as a version of '{}': {}", v, binary, e),
            )
        })
    };

    let found = parse(version)?;
    let min = parse(min)?;
    let max = parse(max_exclusive)?;
    if found < min || found >= max {
        return Err(Error::validation(
            origin,
            format!(
                "Version '{}' of '{}' is not in the supported range [{}, {}).",
                found, binary, min, max
            ),
        ));
    }
    Ok(())
}
