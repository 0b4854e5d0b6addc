//! Configuration layer
//!
//! Steps describe their options with [`OptionDescriptor`]s and register them
//! into a shared [`ConfigRegistry`] before parsing. The registry compiles into
//! a `clap::Command`. Values are merged with the precedence
//! command line > environment (`<PREFIX><OPTION_NAME>`) > YAML config file >
//! default, and read back through the same descriptors, so a flag name and
//! its lookup can never drift apart.

use crate::core::errors::{Error, Result};
use crate::core::step_type::{Selection, StepSet, STEP_ALL};
use clap::builder::PossibleValuesParser;
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command};
use serde_yaml::Value;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Heading used for options shared by every suite
pub const GLOBAL_OPTIONS_HEADING: &str = "Global options";

const CONFIG_FILE_NAME: &str = "main.yaml";

/// Shape of the value an option accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// Boolean switch without a value
    Flag,
    /// Single value
    Value,
    /// One or more values
    List,
}

/// Typed description of a single command line option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionDescriptor {
    long: String,
    short: Option<char>,
    help: String,
    kind: OptionKind,
    default: Vec<String>,
    possible_values: Vec<String>,
}

impl OptionDescriptor {
    fn new(long: impl Into<String>, help: impl Into<String>, kind: OptionKind) -> Self {
        Self {
            long: long.into(),
            short: None,
            help: help.into(),
            kind,
            default: Vec::new(),
            possible_values: Vec::new(),
        }
    }

    pub fn flag(long: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(long, help, OptionKind::Flag)
    }

    pub fn value(long: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(long, help, OptionKind::Value)
    }

    pub fn list(long: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(long, help, OptionKind::List)
    }

    pub fn with_short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default.push(value.into());
        self
    }

    pub fn with_possible_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.possible_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Long option name without the leading dashes
    pub fn long(&self) -> &str {
        &self.long
    }

    pub fn short(&self) -> Option<char> {
        self.short
    }

    pub fn kind(&self) -> OptionKind {
        self.kind
    }

    pub fn default_values(&self) -> &[String] {
        &self.default
    }

    /// Name of the environment variable feeding this option
    pub fn env_var(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.long.to_uppercase().replace('-', "_"))
    }

    fn to_arg(&self, env_prefix: &str, heading: Option<&str>) -> Arg {
        let mut arg = Arg::new(self.long.clone())
            .long(self.long.clone())
            .help(self.help.clone())
            .env(self.env_var(env_prefix));

        if let Some(short) = self.short {
            arg = arg.short(short);
        }

        arg = match self.kind {
            OptionKind::Flag => arg.action(ArgAction::SetTrue),
            OptionKind::Value => arg.action(ArgAction::Set).num_args(1),
            OptionKind::List => arg
                .action(ArgAction::Append)
                .num_args(1..)
                .value_delimiter(','),
        };

        if !self.default.is_empty() {
            arg = arg.default_values(self.default.clone());
        }
        if !self.possible_values.is_empty() {
            arg = arg.value_parser(PossibleValuesParser::new(self.possible_values.clone()));
        }
        if let Some(heading) = heading {
            arg = arg.help_heading(heading.to_string());
        }
        arg
    }

    /// Command line arguments equivalent to a config file entry
    fn file_args(&self, value: &Value) -> Result<Vec<String>> {
        let invalid = || {
            Error::config(
                self.long.clone(),
                format!("Unsupported value '{:?}' in config file.", value),
            )
        };

        match self.kind {
            OptionKind::Flag => match value {
                Value::Bool(true) => Ok(vec![format!("--{}", self.long)]),
                Value::Bool(false) | Value::Null => Ok(Vec::new()),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(vec![format!("--{}", self.long)]),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Vec::new()),
                _ => Err(invalid()),
            },
            OptionKind::Value => match scalar_to_string(value) {
                Some(v) => Ok(vec![format!("--{}={}", self.long, v)]),
                None if value.is_null() => Ok(Vec::new()),
                None => Err(invalid()),
            },
            OptionKind::List => match value {
                Value::Sequence(items) => items
                    .iter()
                    .map(|item| {
                        scalar_to_string(item)
                            .map(|v| format!("--{}={}", self.long, v))
                            .ok_or_else(invalid)
                    })
                    .collect(),
                other => scalar_to_string(other)
                    .map(|v| vec![format!("--{}={}", self.long, v)])
                    .ok_or_else(invalid),
            },
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `-d/--debug`
pub fn debug_option() -> OptionDescriptor {
    OptionDescriptor::flag("debug", "Enable debug messages.").with_short('d')
}

/// `--steps`
pub fn steps_option(vocabulary: &StepSet) -> OptionDescriptor {
    OptionDescriptor::list(
        "steps",
        format!(
            "List of steps to execute. Available steps: {}",
            vocabulary_names(vocabulary)
        ),
    )
    .with_default(STEP_ALL.as_str())
}

/// `--skip-steps`
pub fn skip_steps_option(vocabulary: &StepSet) -> OptionDescriptor {
    OptionDescriptor::list(
        "skip-steps",
        format!(
            "List of steps to skip. Available steps: {}",
            vocabulary_names(vocabulary)
        ),
    )
}

fn vocabulary_names(vocabulary: &StepSet) -> String {
    vocabulary
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Where the config file of a suite is looked up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigAnchor {
    /// Next to the file named by this option
    ParentOfFile { long: &'static str, short: Option<char> },
    /// Inside the directory named by this option
    Directory { long: &'static str, short: Option<char> },
}

impl ConfigAnchor {
    fn descriptor(&self) -> OptionDescriptor {
        let (long, short) = match *self {
            ConfigAnchor::ParentOfFile { long, short } | ConfigAnchor::Directory { long, short } => {
                (long, short)
            }
        };
        let descriptor = OptionDescriptor::value(long, "");
        match short {
            Some(c) => descriptor.with_short(c),
            None => descriptor,
        }
    }
}

/// Static description of a suite binary
#[derive(Debug, Clone)]
pub struct SuiteInfo {
    pub name: &'static str,
    pub about: &'static str,
    pub version: &'static str,
    /// Prefix of every environment variable, e.g. `ATS_`
    pub env_prefix: &'static str,
    pub vocabulary: StepSet,
    /// Directory holding `main.yaml`, e.g. `.ats`
    pub config_dir: &'static str,
    pub config_anchor: ConfigAnchor,
}

impl SuiteInfo {
    fn config_file_candidates(&self, anchor_value: Option<&str>) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(value) = anchor_value {
            let base = match self.config_anchor {
                ConfigAnchor::ParentOfFile { .. } => Path::new(value)
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default(),
                ConfigAnchor::Directory { .. } => PathBuf::from(value),
            };
            candidates.push(base.join(self.config_dir).join(CONFIG_FILE_NAME));
        }
        candidates.push(Path::new(self.config_dir).join(CONFIG_FILE_NAME));
        candidates
    }


    /// First existing config file for the given anchor value
    pub fn find_config_file(&self, anchor_value: Option<&str>) -> Option<PathBuf> {
        self.config_file_candidates(anchor_value)
            .into_iter()
            .find(|p| p.is_file())
    }
}

/// Failure while turning arguments into a [`Config`]
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    /// Usage error, `--help` or `--version`; clap knows how to report it
    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error(transparent)]
    Invalid(#[from] Error),
}

#[derive(Debug, Clone)]
struct RegisteredOption {
    descriptor: OptionDescriptor,
    heading: Option<String>,
}

/// Schema of every option known to a suite
#[derive(Debug, Default)]
pub struct ConfigRegistry {
    options: Vec<RegisteredOption>,
    groups: Vec<(String, Vec<String>)>,
    heading: Option<String>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the global options of a suite
    pub fn for_suite(suite: &SuiteInfo) -> Result<Self> {
        let mut registry = Self::new();
        registry.set_heading(GLOBAL_OPTIONS_HEADING);
        let steps = steps_option(&suite.vocabulary);
        let skip_steps = skip_steps_option(&suite.vocabulary);
        registry.add(debug_option())?;
        registry.add(steps.clone())?;
        registry.add(skip_steps.clone())?;
        registry.mutually_exclusive("step-selection", &[&steps, &skip_steps])?;
        Ok(registry)
    }

    /// Heading applied to options registered from now on
    pub fn set_heading(&mut self, heading: impl Into<String>) {
        self.heading = Some(heading.into());
    }

    pub fn heading(&self) -> Option<&str> {
        self.heading.as_deref()
    }

    /// Register an option
    ///
    /// Registering an identical descriptor again is a no-op; a different
    /// descriptor under an already used name or short flag is an error.
    pub fn add(&mut self, descriptor: OptionDescriptor) -> Result<()> {
        if let Some(existing) = self.get(descriptor.long()) {
            if *existing == descriptor {
                debug!("Option '--{}' already registered, skipping", descriptor.long());
                return Ok(());
            }
            return Err(Error::config(
                descriptor.long(),
                "Option registered twice with different definitions.",
            ));
        }

        if let Some(short) = descriptor.short() {
            if let Some(other) = self
                .options
                .iter()
                .find(|o| o.descriptor.short() == Some(short))
            {
                return Err(Error::config(
                    descriptor.long(),
                    format!(
                        "Short flag '-{}' is already used by '--{}'.",
                        short,
                        other.descriptor.long()
                    ),
                ));
            }
        }

        self.options.push(RegisteredOption {
            descriptor,
            heading: self.heading.clone(),
        });
        Ok(())
    }

    /// Declare that at most one of `options` may be given
    pub fn mutually_exclusive(&mut self, id: &str, options: &[&OptionDescriptor]) -> Result<()> {
        for option in options {
            if self.get(option.long()).is_none() {
                return Err(Error::config(
                    option.long(),
                    "Option must be registered before it can be grouped.",
                ));
            }
        }
        if self.groups.iter().any(|(existing, _)| existing == id) {
            return Ok(());
        }
        self.groups.push((
            id.to_string(),
            options.iter().map(|o| o.long().to_string()).collect(),
        ));
        Ok(())
    }

    pub fn get(&self, long: &str) -> Option<&OptionDescriptor> {
        self.options
            .iter()
            .find(|o| o.descriptor.long() == long)
            .map(|o| &o.descriptor)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &OptionDescriptor> {
        self.options.iter().map(|o| &o.descriptor)
    }

    /// Compile the registry into a clap command
    pub fn command(&self, suite: &SuiteInfo) -> Command {
        let mut command = Command::new(suite.name)
            .about(suite.about)
            .version(suite.version);

        for option in &self.options {
            command = command.arg(
                option
                    .descriptor
                    .to_arg(suite.env_prefix, option.heading.as_deref()),
            );
        }
        for (id, members) in &self.groups {
            command = command.group(
                ArgGroup::new(id.clone())
                    .args(members.clone())
                    .multiple(false),
            );
        }
        command
    }

    /// Parse arguments, environment and the config file into a [`Config`]
    pub fn parse_from<I, T>(&self, suite: &SuiteInfo, args: I) -> Result<Config, ConfigLoadError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let command = self.command(suite);
        let mut matches = command.clone().try_get_matches_from(args.clone())?;

        let anchor = string_value(&matches, suite.config_anchor.descriptor().long());
        let config_file = suite.find_config_file(anchor.as_deref());
        if let Some(path) = &config_file {
            debug!("Loading config file '{}'", path.display());
            let extra = self.config_file_args(path, &matches)?;
            if !extra.is_empty() {
                let mut merged = args;
                merged.extend(extra.into_iter().map(OsString::from));
                matches = command.try_get_matches_from(merged)?;
            }
        }

        let steps = string_values(&matches, "steps");
        let skip_steps = string_values(&matches, "skip-steps");
        let selection = Selection::from_names(&steps, &skip_steps, &suite.vocabulary)?;
        let debug = matches!(matches.try_get_one::<bool>("debug"), Ok(Some(true)));

        Ok(Config {
            matches,
            selection,
            debug,
            options: self.descriptors().cloned().collect(),
            config_file,
        })
    }

    fn config_file_args(&self, path: &Path, matches: &ArgMatches) -> Result<Vec<String>> {
        let mapping = read_config_mapping(path)?;
        let mut args = Vec::new();
        for (key, value) in mapping {
            let Some(key) = key.as_str() else {
                return Err(Error::config(
                    "config-file",
                    format!("Non-string key found in config file '{}'.", path.display()),
                ));
            };
            let long = normalize_key(key);
            let Some(descriptor) = self.get(&long) else {
                return Err(Error::config(
                    long,
                    format!("Unknown option '{}' in config file '{}'.", key, path.display()),
                ));
            };
            let explicit = matches!(
                matches.value_source(descriptor.long()),
                Some(ValueSource::CommandLine | ValueSource::EnvVariable)
            );
            if explicit {
                continue;
            }
            args.extend(descriptor.file_args(&value)?);
        }
        Ok(args)
    }
}

fn read_config_mapping(path: &Path) -> Result<serde_yaml::Mapping> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::config(
            "config-file",
            format!("Can't read config file '{}': {}", path.display(), e),
        )
    })?;
    let doc: Value = serde_yaml::from_str(&content).map_err(|e| {
        Error::config(
            "config-file",
            format!("Config file '{}' is not valid YAML: {}", path.display(), e),
        )
    })?;
    match doc {
        Value::Mapping(mapping) => Ok(mapping),
        Value::Null => Ok(serde_yaml::Mapping::new()),
        _ => Err(Error::config(
            "config-file",
            format!("Config file '{}' must contain a YAML mapping.", path.display()),
        )),
    }
}

fn normalize_key(key: &str) -> String {
    key.trim_start_matches('-').replace('_', "-")
}

fn string_value(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.try_get_one::<String>(id).ok().flatten().cloned()
}

fn string_values(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .try_get_many::<String>(id)
        .ok()
        .flatten()
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

/// Look up a single option before the full command exists
///
/// Needed for options that decide which steps get built, like the test
/// executor. Checks the command line, then the environment, then the config
/// file.
pub fn pre_scan(suite: &SuiteInfo, args: &[OsString], option: &OptionDescriptor) -> Option<String> {
    if let Some(value) = scan_args(args, option) {
        return Some(value);
    }
    if let Ok(value) = std::env::var(option.env_var(suite.env_prefix)) {
        return Some(value);
    }

    let anchor = suite.config_anchor.descriptor();
    let anchor_value = scan_args(args, &anchor)
        .or_else(|| std::env::var(anchor.env_var(suite.env_prefix)).ok());
    let path = suite.find_config_file(anchor_value.as_deref())?;
    let mapping = read_config_mapping(&path).ok()?;
    mapping.iter().find_map(|(key, value)| {
        let key = key.as_str()?;
        if normalize_key(key) != option.long() {
            return None;
        }
        scalar_to_string(value)
    })
}

/// Like [`pre_scan`] for boolean flags
pub fn pre_scan_flag(suite: &SuiteInfo, args: &[OsString], option: &OptionDescriptor) -> bool {
    pre_scan(suite, args, option)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(false)
}

fn scan_args(args: &[OsString], option: &OptionDescriptor) -> Option<String> {
    let long = format!("--{}", option.long());
    let long_eq = format!("{}=", long);
    let short = option.short().map(|c| format!("-{}", c));
    let takes_value = option.kind() != OptionKind::Flag;

    let mut iter = args.iter().skip(1).filter_map(|a| a.to_str());
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix(&long_eq) {
            return Some(value.to_string());
        }
        let matches_flag = arg == long || short.as_deref() == Some(arg);
        if matches_flag {
            if !takes_value {
                return Some("true".to_string());
            }
            return iter.next().map(str::to_string);
        }
    }
    None
}

/// Parsed and validated configuration of a run
#[derive(Debug, Clone)]
pub struct Config {
    matches: ArgMatches,
    selection: Selection,
    debug: bool,
    options: Vec<OptionDescriptor>,
    config_file: Option<PathBuf>,
}

impl Config {
    /// Value of a flag; unregistered flags read as `false`
    pub fn flag(&self, option: &OptionDescriptor) -> bool {
        matches!(self.matches.try_get_one::<bool>(option.long()), Ok(Some(true)))
    }

    /// Value of a single-value option
    pub fn value(&self, option: &OptionDescriptor) -> Option<String> {
        string_value(&self.matches, option.long())
    }

    /// Values of a list option
    pub fn values(&self, option: &OptionDescriptor) -> Vec<String> {
        string_values(&self.matches, option.long())
    }

    pub fn path(&self, option: &OptionDescriptor) -> Option<PathBuf> {
        self.value(option).map(PathBuf::from)
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Config file merged into this configuration, if any
    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Effective values of every registered option, for logging
    pub fn describe(&self) -> Vec<(String, String)> {
        self.options
            .iter()
            .filter_map(|option| {
                let rendered = match option.kind() {
                    OptionKind::Flag => Some(self.flag(option).to_string()),
                    OptionKind::Value => self.value(option),
                    OptionKind::List => {
                        let values = self.values(option);
                        (!values.is_empty()).then(|| values.join(","))
                    }
                };
                rendered.map(|v| (option.long().to_string(), v))
            })
            .collect()
    }
}
