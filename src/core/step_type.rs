//! Step types and step selection
//!
//! Every step declares the set of step types it provides. Users pick which
//! step types to execute with `--steps` or `--skip-steps`, which is
//! normalized into a [`Selection`] holding one effective include set.

use crate::core::errors::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;

/// Named capability a step can provide
///
/// The vocabulary is closed per suite, so step types are plain static
/// identifiers compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepType(&'static str);

impl StepType {
    /// Create a step type from its name
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Name of the step type as used on the command line
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Wildcard matching every step type
pub const STEP_ALL: StepType = StepType::new("all");

/// Ordered set of step types
pub type StepSet = BTreeSet<StepType>;

/// Build a [`StepSet`] from a slice of step types
pub fn step_set(types: &[StepType]) -> StepSet {
    types.iter().copied().collect()
}

/// How the user expressed the selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Include,
    Skip,
}

/// Validated `--steps`/`--skip-steps` selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    mode: SelectionMode,
    requested: StepSet,
    effective: StepSet,
}

impl Default for Selection {
    fn default() -> Self {
        Self::all()
    }
}

impl Selection {
    /// Selection of every step
    pub fn all() -> Self {
        Self::include([STEP_ALL])
    }

    /// Select only the given step types
    pub fn include(types: impl IntoIterator<Item = StepType>) -> Self {
        let requested: StepSet = types.into_iter().collect();
        Self {
            mode: SelectionMode::Include,
            effective: requested.clone(),
            requested,
        }
    }

    /// Select every known step type except the skipped ones
    pub fn skip(types: impl IntoIterator<Item = StepType>, vocabulary: &StepSet) -> Result<Self> {
        let requested: StepSet = types.into_iter().collect();
        if requested.contains(&STEP_ALL) {
            return Err(Error::config(
                "skip-steps",
                "'all' is not a reasonable step kind to skip.",
            ));
        }
        let effective = vocabulary
            .iter()
            .filter(|t| **t != STEP_ALL && !requested.contains(*t))
            .copied()
            .collect();
        Ok(Self {
            mode: SelectionMode::Skip,
            requested,
            effective,
        })
    }

    /// Build a selection from raw option values
    ///
    /// `steps` normally carries its default `["all"]`, so a non-empty
    /// `skip_steps` only conflicts with an explicit, narrower `steps` list.
    pub fn from_names(steps: &[String], skip_steps: &[String], vocabulary: &StepSet) -> Result<Self> {
        if !skip_steps.is_empty() {
            if steps.iter().any(|s| s != STEP_ALL.as_str()) {
                return Err(Error::config(
                    "steps",
                    "Only one of '--steps' and '--skip-steps' can be used at the same time.",
                ));
            }
            if skip_steps.iter().any(|s| s == STEP_ALL.as_str()) {
                return Err(Error::config(
                    "skip-steps",
                    "'all' is not a reasonable step kind to skip.",
                ));
            }
            let types = resolve_names("skip-steps", skip_steps, vocabulary)?;
            return Self::skip(types, vocabulary);
        }

        if steps.is_empty() {
            return Ok(Self::all());
        }
        let types = resolve_names("steps", steps, vocabulary)?;
        Ok(Self::include(types))
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Step types exactly as requested by the user
    pub fn requested(&self) -> &StepSet {
        &self.requested
    }

    /// Effective include set after normalizing skip lists
    pub fn effective(&self) -> &StepSet {
        &self.effective
    }

    /// Whether a step providing `provided` takes part in this run
    ///
    /// A selection containing `all` selects everything, and a step that
    /// provides nothing but `all` is always selected.
    pub fn selects(&self, provided: &StepSet) -> bool {
        if self.effective.contains(&STEP_ALL) {
            return true;
        }
        let mut specific = provided.iter().filter(|t| **t != STEP_ALL).peekable();
        if specific.peek().is_none() {
            return provided.contains(&STEP_ALL);
        }
        specific.any(|t| self.effective.contains(t))
    }
}

fn resolve_names(option: &str, names: &[String], vocabulary: &StepSet) -> Result<Vec<StepType>> {
    names
        .iter()
        .map(|name| {
            vocabulary
                .iter()
                .find(|t| t.as_str() == name)
                .copied()
                .ok_or_else(|| {
                    let known: Vec<&str> = vocabulary.iter().map(|t| t.as_str()).collect();
                    Error::config(
                        option,
                        format!("Unknown step '{}'. Valid steps are: {}.", name, known.join(", ")),
                    )
                })
        })
        .collect()
}
