//! Configuration for the exporter, loaded from a TOML file.
//!
//! Durations are written as `{ unit = "seconds", value = 30 }` tables and
//! filesystem paths may use `~` or environment variables. Credentials
//! support indirection: a literal value, `file://<path>` to read the value
//! from a file, or `base64://<blob>` to decode an inline blob.

use std::{
    collections::HashSet,
    net::SocketAddr,
    path::PathBuf,
    time::Duration,
};

use base64::Engine as _;
use ext_config::{Config, File, FileFormat};
use serde::{
    de::{self, Deserializer},
    Deserialize,
};

use crate::error::ExporterErrorKind;

/// Root configuration, one section per subsystem.
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    pub jenkins: JenkinsConfig,
    pub collector: CollectorConfig,
    #[serde(default)]
    pub web: WebConfig,
}

/// Connection settings for the Jenkins instance being exported.
#[derive(Debug, Clone, Deserialize)]
pub struct JenkinsConfig {
    /// Root URL of the Jenkins instance.
    pub url: String,
    /// Username; empty means anonymous access.
    #[serde(default)]
    pub username: String,
    /// Password or API token; supports `file://` and `base64://` indirection.
    #[serde(default)]
    pub password: String,
    /// Per-request timeout for gateway calls.
    #[serde(default = "default_jenkins_timeout", deserialize_with = "duration_from_toml")]
    pub timeout: Duration,
}

/// Settings for the discovery and collection pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Filesystem path of the job catalogue database.
    #[serde(deserialize_with = "path_from_toml")]
    pub catalogue_path: PathBuf,
    /// Interval between discovery reconciliation cycles.
    #[serde(default = "default_discovery_interval", deserialize_with = "duration_from_toml")]
    pub discovery_interval: Duration,
    /// Minimum gap between two collection cycles; triggers arriving
    /// earlier are dropped.
    #[serde(default = "default_collector_min_gap", deserialize_with = "duration_from_toml")]
    pub collector_min_gap: Duration,
    /// Number of concurrent workers fetching build results.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Comma-separated top-level folder filter; empty means all folders.
    #[serde(default)]
    pub folders: String,
    /// Top-level folder names whose jobs are neither discovered nor exposed.
    #[serde(default)]
    pub excluded_folders: Vec<String>,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    /// Listen address.
    #[serde(default = "default_web_address")]
    pub address: String,
    /// Path the metrics are exposed on.
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            address: default_web_address(),
            path: default_metrics_path(),
        }
    }
}

fn default_jenkins_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_discovery_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_collector_min_gap() -> Duration {
    Duration::from_secs(5)
}

fn default_worker_count() -> usize {
    10
}

fn default_web_address() -> String {
    "0.0.0.0:9410".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl ExporterConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: &str) -> Result<Self, ExporterErrorKind> {
        let settings = Config::builder()
            .add_source(File::new(path, FileFormat::Toml))
            .build()?;
        let config: ExporterConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration from an in-memory TOML string.
    pub fn from_toml_str(raw: &str) -> Result<Self, ExporterErrorKind> {
        let settings = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()?;
        let config: ExporterConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ExporterErrorKind> {
        if self.jenkins.url.trim().is_empty() {
            return Err(ExporterErrorKind::InvalidConfiguration(
                "jenkins.url must not be empty".to_string(),
            ));
        }
        if self.collector.catalogue_path.as_os_str().is_empty() {
            return Err(ExporterErrorKind::InvalidConfiguration(
                "collector.catalogue_path must not be empty".to_string(),
            ));
        }
        if self.collector.worker_count == 0 {
            return Err(ExporterErrorKind::InvalidConfiguration(
                "collector.worker_count must be at least 1".to_string(),
            ));
        }
        if self.web.address.parse::<SocketAddr>().is_err() {
            return Err(ExporterErrorKind::InvalidConfiguration(format!(
                "web.address is not a valid socket address: {}",
                self.web.address
            )));
        }
        if !self.web.path.starts_with('/') {
            return Err(ExporterErrorKind::InvalidConfiguration(format!(
                "web.path must start with '/': {}",
                self.web.path
            )));
        }
        Ok(())
    }

    /// The validated listen address.
    pub fn listen_address(&self) -> SocketAddr {
        self.web
            .address
            .parse()
            .expect("validated at configuration load")
    }

    /// Top-level folder filter as a list, split on commas.
    pub fn folder_filter(&self) -> Vec<String> {
        self.collector
            .folders
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// The exclusion set, matched exactly against the first path segment.
    pub fn excluded_set(&self) -> HashSet<String> {
        self.collector
            .excluded_folders
            .iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

/// Resolve a credential value that may use `file://` or `base64://`
/// indirection. Anything else is returned as-is.
pub fn resolve_secret(value: &str) -> Result<String, ExporterErrorKind> {
    if let Some(path) = value.strip_prefix("file://") {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ExporterErrorKind::Secret(format!("failed to read {path}: {e}")))?;
        return Ok(content);
    }

    if let Some(blob) = value.strip_prefix("base64://") {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(blob)
            .map_err(|e| ExporterErrorKind::Secret(format!("failed to decode base64 value: {e}")))?;
        return String::from_utf8(bytes)
            .map_err(|e| ExporterErrorKind::Secret(format!("secret is not valid UTF-8: {e}")));
    }

    Ok(value.to_string())
}

/// Deserialize a duration from a `{ unit, value }` TOML table.
pub fn duration_from_toml<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Helper {
        unit: String,
        value: u64,
    }

    let helper = Helper::deserialize(deserializer)?;
    match helper.unit.as_str() {
        "seconds" | "secs" | "s" => Ok(Duration::from_secs(helper.value)),
        "milliseconds" | "millis" | "ms" => Ok(Duration::from_millis(helper.value)),
        "minutes" | "mins" | "m" => Ok(Duration::from_secs(helper.value * 60)),
        _ => Err(de::Error::custom("Unsupported duration unit")),
    }
}

/// Deserialize a TOML string into a `PathBuf`, expanding `~` and
/// environment variables like `$HOME` or `${VAR}`.
pub fn path_from_toml<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let expanded = shellexpand::full(&raw).map_err(|e| de::Error::custom(e.to_string()))?;
    Ok(PathBuf::from(expanded.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const MINIMAL: &str = r#"
        [jenkins]
        url = "https://jenkins.example.com"
        username = "bot"
        password = "hunter2"

        [collector]
        catalogue_path = "/tmp/catalogue.db"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = ExporterConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.jenkins.timeout, Duration::from_secs(30));
        assert_eq!(config.collector.discovery_interval, Duration::from_secs(300));
        assert_eq!(config.collector.collector_min_gap, Duration::from_secs(5));
        assert_eq!(config.collector.worker_count, 10);
        assert_eq!(config.web.path, "/metrics");
        assert!(config.folder_filter().is_empty());
        assert!(config.excluded_set().is_empty());
    }

    #[test]
    fn durations_parse_from_unit_value_tables() {
        let raw = r#"
            [jenkins]
            url = "https://jenkins.example.com"
            timeout = { unit = "seconds", value = 10 }

            [collector]
            catalogue_path = "/tmp/catalogue.db"
            discovery_interval = { unit = "minutes", value = 1 }
            collector_min_gap = { unit = "ms", value = 500 }
        "#;
        let config = ExporterConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.jenkins.timeout, Duration::from_secs(10));
        assert_eq!(config.collector.discovery_interval, Duration::from_secs(60));
        assert_eq!(config.collector.collector_min_gap, Duration::from_millis(500));
    }

    #[test]
    fn folder_filter_splits_on_commas() {
        let raw = r#"
            [jenkins]
            url = "https://jenkins.example.com"

            [collector]
            catalogue_path = "/tmp/catalogue.db"
            folders = "release, hotfix ,,  "
            excluded_folders = ["prod-legacy", " "]
        "#;
        let config = ExporterConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.folder_filter(), vec!["release", "hotfix"]);
        let excluded = config.excluded_set();
        assert_eq!(excluded.len(), 1);
        assert!(excluded.contains("prod-legacy"));
    }

    #[test]
    fn invalid_listen_address_is_rejected() {
        let raw = r#"
            [jenkins]
            url = "https://jenkins.example.com"

            [collector]
            catalogue_path = "/tmp/catalogue.db"

            [web]
            address = "not-an-address"
        "#;
        let err = ExporterConfig::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, ExporterErrorKind::InvalidConfiguration(_)));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let raw = r#"
            [jenkins]
            url = "https://jenkins.example.com"

            [collector]
            catalogue_path = "/tmp/catalogue.db"
            worker_count = 0
        "#;
        let err = ExporterConfig::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, ExporterErrorKind::InvalidConfiguration(_)));
    }

    #[test]
    fn secret_literal_passes_through() {
        assert_eq!(resolve_secret("plain-token").unwrap(), "plain-token");
    }

    #[test]
    fn secret_base64_decodes() {
        assert_eq!(resolve_secret("base64://aHVudGVyMg==").unwrap(), "hunter2");
        assert!(resolve_secret("base64://not base64!").is_err());
    }

    #[test]
    fn secret_file_reads_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "from-file").unwrap();
        let value = format!("file://{}", file.path().display());
        assert_eq!(resolve_secret(&value).unwrap(), "from-file");
        assert!(resolve_secret("file:///does/not/exist").is_err());
    }
}
