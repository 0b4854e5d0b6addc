//! Chart metadata (`Chart.yaml`) and packaged chart archives

use anyhow::{anyhow, Context as _, Result};
use flate2::read::GzDecoder;
use serde_yaml::Value;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::debug;

pub const CHART_YAML: &str = "Chart.yaml";

/// Parsed `Chart.yaml`
///
/// The raw document is kept so that rewriting a few fields preserves
/// everything else in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartMetadata {
    pub api_version: Option<String>,
    pub name: String,
    pub version: String,
    pub app_version: Option<String>,
    raw: Value,
}

fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl ChartMetadata {
    pub fn from_yaml(raw: Value) -> Result<Self> {
        if !raw.is_mapping() {
            return Err(anyhow!("Chart.yaml is not a YAML mapping"));
        }
        Ok(Self {
            api_version: scalar(raw.get("apiVersion")),
            name: scalar(raw.get("name")).unwrap_or_default(),
            version: scalar(raw.get("version")).unwrap_or_default(),
            app_version: scalar(raw.get("appVersion")),
            raw,
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        let raw: Value = serde_yaml::from_str(content).context("Chart.yaml is not valid YAML")?;
        Self::from_yaml(raw)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Can't read '{}'", path.display()))?;
        Self::parse(&content).with_context(|| format!("Can't parse '{}'", path.display()))
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    fn set(&mut self, key: &str, value: &str) {
        if let Value::Mapping(map) = &mut self.raw {
            map.insert(Value::from(key), Value::from(value));
        }
    }

    pub fn set_version(&mut self, version: &str) {
        self.version = version.to_string();
        self.set("version", version);
    }

    pub fn set_app_version(&mut self, app_version: &str) {
        self.app_version = Some(app_version.to_string());
        self.set("appVersion", app_version);
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let rendered = serde_yaml::to_string(&self.raw)?;
        fs::write(path, rendered).with_context(|| format!("Can't write '{}'", path.display()))
    }
}

/// Read `Chart.yaml` from a packaged chart
///
/// The archive is unpacked into a temporary directory that is removed before
/// returning. Sub-directories are searched in name order and the first one
/// holding a `Chart.yaml` wins. `Ok(None)` means no sub-directory has one.
pub fn read_chart_archive(archive: &Path) -> Result<Option<ChartMetadata>> {
    let dir = tempfile::Builder::new()
        .prefix("ats-")
        .tempdir()
        .context("Can't create a temporary directory")?;
    let file = File::open(archive).with_context(|| format!("Can't open '{}'", archive.display()))?;
    Archive::new(GzDecoder::new(file))
        .unpack(dir.path())
        .with_context(|| format!("Can't unpack chart archive '{}'", archive.display()))?;

    let mut sub_dirs: Vec<PathBuf> = fs::read_dir(dir.path())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    sub_dirs.sort();

    for sub_dir in sub_dirs {
        let chart_yaml = sub_dir.join(CHART_YAML);
        if chart_yaml.is_file() {
            debug!("Found {} in '{}'", CHART_YAML, sub_dir.display());
            return ChartMetadata::from_file(&chart_yaml).map(Some);
        }
    }
    Ok(None)
}
