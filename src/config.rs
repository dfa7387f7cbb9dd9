use crate::error::ConfigError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.planet.com/data/v1";
pub const DEFAULT_ITEM_TYPE: &str = "PSScene4Band";

/// Settings for a whole run. Built once at startup and shared read-only by every stage.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: Url,
    #[serde(default = "default_item_type")]
    pub item_type: String,
    /// Where tasks that ran out of download attempts are written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter: Option<PathBuf>,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    pub regions: BTreeMap<String, Region>,
}

/// An area of interest with its own search filters and download directory.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Region {
    pub geojson: PathBuf,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub cloud_limit: f64,
    pub download: PathBuf,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndeterminatePolicy {
    /// Log and move on; nothing is queued for the asset.
    #[default]
    Skip,
    /// Queue the asset as pending so it is checked again later.
    Retry,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub idle_wait_ms: u64,
    pub recheck_interval_secs: u64,
    pub status_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub indeterminate: IndeterminatePolicy,
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            idle_wait_ms: 100,
            recheck_interval_secs: 180,
            status_timeout_secs: 20,
            download_timeout_secs: 10,
            indeterminate: IndeterminatePolicy::Skip,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineSettings {
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.recheck_interval_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Exponential backoff for failed downloads. Without `max_attempts` a task is retried forever.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next try after `attempts` failures.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        let delay = self.base_delay_ms.saturating_mul(1_u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

fn default_api_url() -> Url {
    Url::parse(DEFAULT_API_URL).expect("Default API url should always parse")
}

fn default_item_type() -> String {
    DEFAULT_ITEM_TYPE.to_string()
}

pub fn config_toml() -> toml::Table {
    toml::toml! {
        api_url = "https://api.planet.com/data/v1"

        item_type = "PSScene4Band"

        dead_letter = "dead_letters.json"

        [pipeline]
        idle_wait_ms = 100
        recheck_interval_secs = 180
        status_timeout_secs = 20
        download_timeout_secs = 10
        indeterminate = "skip"

        [pipeline.retry]
        base_delay_ms = 1000
        max_delay_ms = 60000

        [regions.berlin]
        geojson = "geojson/berlin.geojson"
        from = "2023-01-01"
        to = "2023-03-31"
        cloud_limit = 0.5
        download = "downloads/berlin"
    }
}

impl Config {
    /// Read and validate a configuration file. Relative paths inside it are taken relative to
    /// the file's own directory.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        let config = config.relative_to(base_dir);
        config.validate()?;
        Ok(config)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_template(table: &toml::Table) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(&table.to_string())?;
        Ok(config)
    }

    pub fn template() -> Result<Self, ConfigError> {
        Self::from_template(&config_toml())
    }

    /// Override the API key, e.g. with one passed on the command line or through the
    /// environment.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        if api_key.is_some() {
            self.api_key = api_key;
        }
        self
    }

    pub fn api_key(&self) -> Result<&str, ConfigError> {
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingApiKey),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.regions.is_empty() {
            return Err(ConfigError::NoRegions);
        }
        for (name, region) in self.regions.iter() {
            if region.from > region.to {
                return Err(ConfigError::DateRange {
                    region: name.clone(),
                    from: region.from,
                    to: region.to,
                });
            }
            if !(0.0..=1.0).contains(&region.cloud_limit) {
                return Err(ConfigError::CloudLimit {
                    region: name.clone(),
                    limit: region.cloud_limit,
                });
            }
        }
        Ok(())
    }

    pub fn region(&self, name: &str) -> Option<&Region> {
        self.regions.get(name)
    }

    fn relative_to(mut self, base_dir: &Path) -> Self {
        let resolve = |p: &PathBuf| {
            if p.is_relative() {
                base_dir.join(p)
            } else {
                p.clone()
            }
        };
        for region in self.regions.values_mut() {
            region.geojson = resolve(&region.geojson);
            region.download = resolve(&region.download);
        }
        self.dead_letter = self.dead_letter.as_ref().map(resolve);
        self
    }
}

impl Region {
    /// Load the region footprint. Feature collections and features are reduced to the geometry
    /// of their first feature.
    pub fn footprint(&self) -> Result<serde_json::Value, ConfigError> {
        let content = fs::read_to_string(&self.geojson).map_err(|source| ConfigError::Read {
            path: self.geojson.clone(),
            source,
        })?;
        let geojson: serde_json::Value =
            serde_json::from_str(&content).map_err(|source| ConfigError::Geometry {
                path: self.geojson.clone(),
                source,
            })?;
        extract_geometry(geojson).ok_or_else(|| ConfigError::EmptyGeometry(self.geojson.clone()))
    }
}

fn extract_geometry(geojson: serde_json::Value) -> Option<serde_json::Value> {
    match geojson.get("type")?.as_str()? {
        "FeatureCollection" => {
            let feature = geojson.get("features")?.as_array()?.first()?.clone();
            extract_geometry(feature)
        }
        "Feature" => {
            let geometry = geojson.get("geometry")?;
            if geometry.is_null() {
                return None;
            }
            Some(geometry.clone())
        }
        _ => Some(geojson),
    }
}
