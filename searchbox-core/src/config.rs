use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable holding an explicit config file path
pub const CONFIG_PATH_ENV: &str = "SEARCHBOX_CONFIG_PATH";

/// Config file looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "searchbox.yaml";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Bootstrap server list, used until discovery publishes its first set
    pub servers: Vec<String>,
    pub discovery: DiscoveryConfig,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: vec!["http://localhost:9200".to_string()],
            discovery: DiscoveryConfig::default(),
            connect_timeout_ms: 3000,
            read_timeout_ms: 3000,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(servers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Time unit of the discovery frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Convert `value` units to a `Duration`, `None` on overflow
    #[must_use]
    pub fn to_duration(self, value: u64) -> Option<Duration> {
        match self {
            Self::Milliseconds => Some(Duration::from_millis(value)),
            Self::Seconds => Some(Duration::from_secs(value)),
            Self::Minutes => value.checked_mul(60).map(Duration::from_secs),
            Self::Hours => value.checked_mul(60 * 60).map(Duration::from_secs),
            Self::Days => value.checked_mul(24 * 60 * 60).map(Duration::from_secs),
        }
    }
}

/// How often discovery runs, as `(value, unit)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryFrequency {
    pub value: u64,
    pub unit: TimeUnit,
}

impl DiscoveryFrequency {
    #[must_use]
    pub const fn new(value: u64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }
}

impl Default for DiscoveryFrequency {
    fn default() -> Self {
        Self::new(10, TimeUnit::Seconds)
    }
}

/// Cluster node discovery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub frequency: DiscoveryFrequency,
    /// Scheme used to build URLs for discovered nodes ("http" or "https")
    pub default_scheme: String,
    /// Node selector for the nodes info request (e.g. "_local", "data:true")
    pub filter: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: DiscoveryFrequency::default(),
            default_scheme: "http".to_string(),
            filter: None,
        }
    }
}

impl DiscoveryConfig {
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub const fn with_frequency(mut self, value: u64, unit: TimeUnit) -> Self {
        self.frequency = DiscoveryFrequency::new(value, unit);
        self
    }

    #[must_use]
    pub fn with_default_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.default_scheme = scheme.into();
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Delay between two discovery cycles.
    ///
    /// Fails when the frequency is zero or does not fit in a `Duration`.
    pub fn interval(&self) -> Result<Duration> {
        if self.frequency.value == 0 {
            return Err(Error::Configuration(
                "discovery frequency must be positive".to_string(),
            ));
        }

        self.frequency
            .unit
            .to_duration(self.frequency.value)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "discovery frequency {} {:?} is too large",
                    self.frequency.value, self.frequency.unit
                ))
            })
    }

    /// Check the settings the discovery loop depends on
    pub fn validate(&self) -> Result<()> {
        self.interval()?;

        let scheme = self.default_scheme.as_str();
        let valid_scheme = scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid_scheme {
            return Err(Error::Configuration(format!(
                "invalid scheme for discovered nodes: '{scheme}'"
            )));
        }

        if self.filter.as_deref().is_some_and(|f| f.trim().is_empty() || f.contains('/')) {
            return Err(Error::Configuration(
                "discovery filter must be a non-empty node selector without '/'".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    ///
    /// Priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file
    /// 3. Defaults
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            } else {
                return Err(Error::Configuration(format!(
                    "config file not found: {path}"
                )));
            }
        }

        // SEARCHBOX_CLIENT__DISCOVERY__ENABLED=true, SEARCHBOX_CLIENT__SERVERS=a,b
        builder = builder.add_source(
            Environment::with_prefix("SEARCHBOX")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("client.servers")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Resolve the config file to use.
    ///
    /// Search order: explicit path, `SEARCHBOX_CONFIG_PATH`, `./searchbox.yaml`.
    #[must_use]
    pub fn locate(explicit: Option<&str>) -> Option<String> {
        explicit
            .map(ToString::to_string)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .or_else(|| {
                Path::new(DEFAULT_CONFIG_FILE)
                    .exists()
                    .then(|| DEFAULT_CONFIG_FILE.to_string())
            })
    }

    /// Validate configuration, collecting every problem found
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.client.servers.is_empty() {
            errors.push("client.servers must contain at least one server".to_string());
        }
        for server in &self.client.servers {
            match url::Url::parse(server) {
                Ok(url) if url.host_str().is_some() => {}
                Ok(_) => errors.push(format!("server '{server}' has no host")),
                Err(e) => errors.push(format!("server '{server}' is not a valid URL: {e}")),
            }
        }

        if self.client.connect_timeout_ms == 0 {
            errors.push("client.connect_timeout_ms must be positive".to_string());
        }
        if self.client.read_timeout_ms == 0 {
            errors.push("client.read_timeout_ms must be positive".to_string());
        }

        if let Err(e) = self.client.discovery.validate() {
            errors.push(e.to_string());
        }

        if crate::logging::parse_log_level(&self.logging.level).is_err() {
            errors.push(format!("invalid logging.level '{}'", self.logging.level));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
