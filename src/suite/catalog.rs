//! Helm catalog access over HTTP
//!
//! Used by the upgrade scenario to resolve the `latest` stable version from a
//! catalog's `index.yaml` and to download the stable chart archive.

use async_trait::async_trait;
use semver::Version;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors when talking to a chart catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Error when fetching '{url}': {message}")]
    Http { url: String, message: String },

    #[error("Error 'HTTP-{status}' when fetching '{url}'")]
    Status { url: String, status: u16 },

    #[error("Can't parse YAML fetched from '{url}': {message}")]
    Yaml { url: String, message: String },

    #[error("'entries' field was not found in the 'index.yaml' fetched from '{url}'.")]
    MissingEntries { url: String },

    #[error("App '{app}' was not found in the 'index.yaml' fetched from '{url}'.")]
    AppNotFound { app: String, url: String },

    #[error("No valid versions of app '{app}' found in the 'index.yaml' fetched from '{url}'.")]
    NoVersions { app: String, url: String },

    #[error("Can't write '{path}': {message}")]
    Io { path: String, message: String },
}

/// `index.yaml` location of a catalog
pub fn index_url(catalog_url: &str) -> String {
    format!("{}/index.yaml", catalog_url.trim_end_matches('/'))
}

/// Location of a chart archive in a catalog
pub fn chart_url(catalog_url: &str, app: &str, version: &str) -> String {
    format!("{}/{}-{}.tgz", catalog_url.trim_end_matches('/'), app, version)
}

/// Sort versions by semver precedence, highest first
///
/// Versions that are not valid semver are dropped.
pub fn sort_versions_desc<S: AsRef<str>>(versions: &[S]) -> Vec<String> {
    let mut parsed: Vec<(Version, String)> = versions
        .iter()
        .filter_map(|raw| {
            let raw = raw.as_ref();
            match Version::parse(raw.trim_start_matches('v')) {
                Ok(v) => Some((v, raw.to_string())),
                Err(e) => {
                    warn!("Ignoring version '{}' which is not valid semver: {}", raw, e);
                    None
                }
            }
        })
        .collect();
    parsed.sort_by(|a, b| b.0.cmp(&a.0));
    parsed.into_iter().map(|(_, raw)| raw).collect()
}

/// Highest version of `app` listed in a catalog index
pub fn parse_latest_version(index: &str, app: &str, url: &str) -> Result<String, CatalogError> {
    let doc: Value = serde_yaml::from_str(index).map_err(|e| CatalogError::Yaml {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    let entries = doc
        .get("entries")
        .ok_or_else(|| CatalogError::MissingEntries { url: url.to_string() })?;
    let app_entries = entries
        .get(app)
        .and_then(Value::as_sequence)
        .ok_or_else(|| CatalogError::AppNotFound {
            app: app.to_string(),
            url: url.to_string(),
        })?;

    let versions: Vec<String> = app_entries
        .iter()
        .filter_map(|entry| match entry.get("version")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect();
    sort_versions_desc(&versions)
        .into_iter()
        .next()
        .ok_or_else(|| CatalogError::NoVersions {
            app: app.to_string(),
            url: url.to_string(),
        })
}

/// Read access to remote chart catalogs
#[async_trait]
pub trait ChartSource: Send + Sync {
    /// Raw `index.yaml` of a catalog
    async fn fetch_index(&self, catalog_url: &str) -> Result<String, CatalogError>;

    /// Download a chart archive into `dest_dir`, returning its path
    async fn download_chart(
        &self,
        catalog_url: &str,
        app: &str,
        version: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, CatalogError>;
}

/// Resolve the highest version of `app` available in a catalog
pub async fn get_latest_version(
    source: &dyn ChartSource,
    catalog_url: &str,
    app: &str,
) -> Result<String, CatalogError> {
    info!("Trying to detect latest app version available in the catalog.");
    let index = source.fetch_index(catalog_url).await?;
    parse_latest_version(&index, app, &index_url(catalog_url))
}

/// [`ChartSource`] backed by `reqwest`
#[derive(Debug, Clone, Default)]
pub struct HttpChartSource {
    client: reqwest::Client,
}

impl HttpChartSource {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, CatalogError> {
        debug!("Fetching '{}'", url);
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, "Mozilla/5.0")
            .send()
            .await
            .map_err(|e| CatalogError::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(CatalogError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChartSource for HttpChartSource {
    async fn fetch_index(&self, catalog_url: &str) -> Result<String, CatalogError> {
        let url = index_url(catalog_url);
        self.get(&url)
            .await?
            .text()
            .await
            .map_err(|e| CatalogError::Http {
                url,
                message: e.to_string(),
            })
    }

    async fn download_chart(
        &self,
        catalog_url: &str,
        app: &str,
        version: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, CatalogError> {
        let url = chart_url(catalog_url, app, version);
        let bytes = self
            .get(&url)
            .await?
            .bytes()
            .await
            .map_err(|e| CatalogError::Http {
                url: url.clone(),
                message: e.to_string(),
            })?;
        let path = dest_dir.join("chart.tgz");
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| CatalogError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        info!("Downloaded '{}' to '{}'", url, path.display());
        Ok(path)
    }
}
