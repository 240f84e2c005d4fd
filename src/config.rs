//! Configuration management for snowstrap using the prefer crate.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BootstrapError, Result};
use crate::fetch::{default_targets, ClientSelector, FetchTarget};
use crate::privacy::{TorConfig, TransportTemplate};

/// Default request timeout in seconds (5 minutes).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_concurrency() -> usize {
    1
}

/// Configuration file structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// PEM bundle with the VPN provider's CA, for pinned targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_ca: Option<PathBuf>,
    /// Total timeout per request in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Fetches in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// User agent config value ("torbrowser" or a custom string).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Tor process settings.
    #[serde(default)]
    pub tor: TorConfig,
    /// Transport template rendered into the torrc.
    #[serde(default)]
    pub transport: TransportTemplate,
    /// Ordered fetch targets.
    #[serde(default = "default_targets")]
    pub targets: Vec<FetchTarget>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tor: TorConfig::default(),
            transport: TransportTemplate::default(),
            provider_ca: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            concurrency: default_concurrency(),
            user_agent: None,
            targets: default_targets(),
            source_path: None,
        }
    }
}

/// Command-line values that take precedence over file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub tor_binary: Option<PathBuf>,
    pub socks_port: Option<u16>,
    pub snowflake_client: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub ca_cert: Option<PathBuf>,
    pub startup_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub concurrency: Option<usize>,
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path wins; otherwise prefer discovers a `snowstrap` config
    /// file in the standard locations. Falls back to defaults when nothing is
    /// found. Environment overrides are applied in every case.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::load_from_path(path).await?,
            None => match prefer::load("snowstrap").await {
                Ok(pref_config) => match pref_config.source_path() {
                    Some(path) => Self::load_from_path(path).await?,
                    None => Self::default(),
                },
                Err(e) => {
                    tracing::debug!("No config file discovered: {}", e);
                    Self::default()
                }
            },
        };
        Ok(config.with_env_overrides())
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            BootstrapError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut config = Self::parse(&contents, path)?;
        config.source_path = Some(path.to_path_buf());
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

        let parsed = match ext {
            "json" => serde_json::from_str(contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e)),
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e)),
            _ => toml::from_str(contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e)),
        };
        parsed.map_err(BootstrapError::Config)
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        self.tor = self.tor.with_env_overrides();
        self.transport = self.transport.with_env_overrides();

        // SNOWSTRAP_CA_CERT - provider CA bundle
        if let Ok(path) = env::var("SNOWSTRAP_CA_CERT") {
            if !path.is_empty() {
                self.provider_ca = Some(PathBuf::from(shellexpand::tilde(&path).as_ref()));
            }
        }

        // SNOWSTRAP_REQUEST_TIMEOUT - seconds
        if let Ok(secs) = env::var("SNOWSTRAP_REQUEST_TIMEOUT") {
            match secs.parse() {
                Ok(secs) => self.request_timeout_secs = secs,
                Err(_) if secs.is_empty() => {}
                Err(_) => tracing::warn!("Ignoring invalid SNOWSTRAP_REQUEST_TIMEOUT: {}", secs),
            }
        }

        self
    }

    /// Apply command-line overrides.
    pub fn with_cli_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(ref path) = overrides.tor_binary {
            self.tor.tor_binary = Some(path.clone());
        }
        if let Some(port) = overrides.socks_port {
            self.tor.socks_port = Some(port);
        }
        if let Some(ref client) = overrides.snowflake_client {
            self.transport.snowflake.client_path = client.clone();
        }
        if let Some(ref dir) = overrides.data_dir {
            self.transport.data_dir = dir.clone();
        }
        if let Some(ref path) = overrides.ca_cert {
            self.provider_ca = Some(path.clone());
        }
        if let Some(secs) = overrides.startup_timeout_secs {
            self.tor.startup_timeout_secs = secs;
        }
        if let Some(secs) = overrides.request_timeout_secs {
            self.request_timeout_secs = secs;
        }
        if let Some(n) = overrides.concurrency {
            self.concurrency = n;
        }
        self
    }

    /// Check values that would otherwise fail later in the run.
    pub fn validate(&self) -> Result<()> {
        self.transport.validate().map_err(BootstrapError::Config)?;
        if self.request_timeout_secs == 0 {
            return Err(BootstrapError::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.tor.startup_timeout_secs == 0 {
            return Err(BootstrapError::Config(
                "startup_timeout_secs must be greater than zero".to_string(),
            ));
        }
        for target in &self.targets {
            url::Url::parse(&target.url).map_err(|e| {
                BootstrapError::Config(format!("invalid target URL {}: {}", target.url, e))
            })?;
        }
        if self.needs_provider_ca() && self.provider_ca.is_none() {
            return Err(BootstrapError::Config(
                "pinned targets require a provider CA (provider_ca, SNOWSTRAP_CA_CERT or --ca-cert)"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Whether any target uses the pinned client.
    pub fn needs_provider_ca(&self) -> bool {
        self.targets
            .iter()
            .any(|t| t.trust == ClientSelector::Pinned)
    }

    /// Get the base directory for resolving relative paths.
    /// Returns the config file's parent directory if available, otherwise None.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved against the config file directory, or CWD
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
        let path = PathBuf::from(expanded);

        if path.is_absolute() {
            return path;
        }
        match self.base_dir() {
            Some(base) => base.join(path),
            None => path,
        }
    }

    /// Read the provider CA bundle, if one is configured.
    pub fn load_ca_bytes(&self) -> Result<Option<Vec<u8>>> {
        let Some(ref path) = self.provider_ca else {
            return Ok(None);
        };
        let path = self.resolve_path(path);
        std::fs::read(&path).map(Some).map_err(|e| {
            BootstrapError::Config(format!(
                "Failed to read provider CA {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| BootstrapError::Config(e.to_string()))
    }
}
