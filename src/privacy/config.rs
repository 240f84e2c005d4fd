//! Tor and Snowflake configuration.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default Snowflake broker (domain-fronted through Fastly).
pub const DEFAULT_BROKER_URL: &str =
    "https://snowflake-broker.torproject.net.global.prod.fastly.net/";

/// Default front domain for broker requests.
pub const DEFAULT_FRONT: &str = "cdn.sstatic.net";

/// Default STUN servers handed to the Snowflake client.
pub const DEFAULT_ICE_SERVERS: &[&str] = &[
    "stun:stun.voip.blackberry.com:3478",
    "stun:stun.altar.com.pl:3478",
    "stun:stun.antisip.com:3478",
    "stun:stun.bluesip.net:3478",
    "stun:stun.dus.net:3478",
    "stun:stun.epygi.com:3478",
    "stun:stun.sonetel.com:3478",
    "stun:stun.sonetel.net:3478",
    "stun:stun.stunprotocol.org:3478",
    "stun:stun.uls.co.za:3478",
    "stun:stun.voipgate.com:3478",
    "stun:stun.voys.nl:3478",
];

/// Placeholder bridge address used by Snowflake (the broker picks the real peer).
pub const DEFAULT_BRIDGE: &str = "0.0.3.0:1";

/// Default time allowed for tor to bootstrap (5 minutes).
pub const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 300;

fn env_flag_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Snowflake pluggable transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnowflakeConfig {
    /// Path to the snowflake-client executable, as tor should exec it.
    pub client_path: String,
    /// Broker URL for WebRTC signaling.
    pub broker_url: String,
    /// Front domain used to reach the broker.
    pub front: String,
    /// ICE/STUN servers.
    pub ice_servers: Vec<String>,
    /// Maximum number of concurrent snowflake peers.
    pub max_peers: u32,
    /// Optional log file for the snowflake client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// Bridge addresses (one `Bridge snowflake <addr>` line each).
    pub bridges: Vec<String>,
}

impl Default for SnowflakeConfig {
    fn default() -> Self {
        Self {
            client_path: "./snowflake-client".to_string(),
            broker_url: DEFAULT_BROKER_URL.to_string(),
            front: DEFAULT_FRONT.to_string(),
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
            max_peers: 3,
            log_file: None,
            bridges: vec![DEFAULT_BRIDGE.to_string()],
        }
    }
}

/// Static template for the transient torrc written on every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportTemplate {
    /// Emit `UseBridges 1`.
    pub use_bridges: bool,
    /// Tor data directory.
    pub data_dir: PathBuf,
    /// Snowflake transport settings.
    pub snowflake: SnowflakeConfig,
}

fn default_data_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("snowstrap").join("tor"))
        .unwrap_or_else(|| PathBuf::from("datadir"))
}

impl Default for TransportTemplate {
    fn default() -> Self {
        Self {
            use_bridges: true,
            data_dir: default_data_dir(),
            snowflake: SnowflakeConfig::default(),
        }
    }
}

impl TransportTemplate {
    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        // SNOWSTRAP_SNOWFLAKE_CLIENT - path to snowflake-client
        if let Some(path) = env_flag_value("SNOWSTRAP_SNOWFLAKE_CLIENT") {
            self.snowflake.client_path = path;
        }

        // SNOWSTRAP_DATA_DIR - tor data directory
        if let Some(dir) = env_flag_value("SNOWSTRAP_DATA_DIR") {
            self.data_dir = PathBuf::from(shellexpand::tilde(&dir).as_ref());
        }

        self
    }

    /// Validate the template, returning an error if it cannot be rendered.
    pub fn validate(&self) -> Result<(), String> {
        let sf = &self.snowflake;
        if sf.bridges.is_empty() {
            return Err("at least one snowflake bridge is required".to_string());
        }
        if sf.ice_servers.is_empty() {
            return Err("at least one ICE server is required".to_string());
        }
        if sf.client_path.trim().is_empty() {
            return Err("snowflake client path is empty".to_string());
        }

        let data_dir = self.data_dir.to_string_lossy();
        let log_file = sf
            .log_file
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let fields = [
            ("data_dir", data_dir.as_ref()),
            ("client_path", sf.client_path.as_str()),
            ("broker_url", sf.broker_url.as_str()),
            ("front", sf.front.as_str()),
            ("log_file", log_file.as_str()),
        ];
        for (name, value) in fields {
            if value.contains(['\n', '\r']) {
                return Err(format!("{} must not contain line breaks", name));
            }
        }
        // ICE servers are joined with commas; bridge lines may carry their own
        for value in &sf.ice_servers {
            if value.contains(['\n', '\r', ',']) || value.trim().is_empty() {
                return Err(format!("invalid ICE server: {:?}", value));
            }
        }
        for value in &sf.bridges {
            if value.contains(['\n', '\r']) || value.trim().is_empty() {
                return Err(format!("invalid bridge line: {:?}", value));
            }
        }
        Ok(())
    }
}

/// Settings for launching the tor process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorConfig {
    /// Path to tor binary (default: search PATH for "tor").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tor_binary: Option<PathBuf>,

    /// SOCKS port for tor to listen on (default: let tor pick one).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socks_port: Option<u16>,

    /// Seconds to wait for tor to finish bootstrapping.
    pub startup_timeout_secs: u64,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            tor_binary: None,
            socks_port: None,
            startup_timeout_secs: DEFAULT_STARTUP_TIMEOUT_SECS,
        }
    }
}

impl TorConfig {
    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        // SNOWSTRAP_TOR_BINARY - path to tor binary
        if let Some(path) = env_flag_value("SNOWSTRAP_TOR_BINARY") {
            self.tor_binary = Some(PathBuf::from(shellexpand::tilde(&path).as_ref()));
        }

        // SNOWSTRAP_SOCKS_PORT - fixed SOCKS port
        if let Some(port) = env_flag_value("SNOWSTRAP_SOCKS_PORT") {
            match port.parse() {
                Ok(port) => self.socks_port = Some(port),
                Err(_) => tracing::warn!("Ignoring invalid SNOWSTRAP_SOCKS_PORT: {}", port),
            }
        }

        // SNOWSTRAP_STARTUP_TIMEOUT - seconds
        if let Some(secs) = env_flag_value("SNOWSTRAP_STARTUP_TIMEOUT") {
            match secs.parse() {
                Ok(secs) => self.startup_timeout_secs = secs,
                Err(_) => tracing::warn!("Ignoring invalid SNOWSTRAP_STARTUP_TIMEOUT: {}", secs),
            }
        }

        self
    }

    /// Bootstrap deadline as a duration.
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Value passed to tor's `--SocksPort`.
    pub fn socks_port_arg(&self) -> String {
        match self.socks_port {
            Some(port) => format!("127.0.0.1:{}", port),
            None => "auto".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_snowflake_matches_reference() {
        let config = SnowflakeConfig::default();
        assert_eq!(config.client_path, "./snowflake-client");
        assert_eq!(config.front, "cdn.sstatic.net");
        assert_eq!(config.ice_servers.len(), 12);
        assert_eq!(config.max_peers, 3);
        assert_eq!(config.bridges, vec!["0.0.3.0:1".to_string()]);
    }

    #[test]
    fn test_default_template_is_valid() {
        assert!(TransportTemplate::default().validate().is_ok());
    }

    #[test]
    fn test_template_requires_bridge() {
        let mut template = TransportTemplate::default();
        template.snowflake.bridges.clear();
        let err = template.validate().unwrap_err();
        assert!(err.contains("bridge"));
    }

    #[test]
    fn test_template_rejects_line_breaks() {
        let mut template = TransportTemplate::default();
        template.snowflake.front = "cdn.sstatic.net\nSocksPort 0".to_string();
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_template_rejects_comma_in_ice_server() {
        let mut template = TransportTemplate::default();
        template.snowflake.ice_servers = vec!["stun:a:3478,stun:b:3478".to_string()];
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_template_accepts_modern_bridge_line() {
        let mut template = TransportTemplate::default();
        template.snowflake.bridges = vec![
            "192.0.2.3:80 2B280B23E1107BB62ABFC40DDCC8824814F80A72 \
             fingerprint=2B280B23E1107BB62ABFC40DDCC8824814F80A72 \
             fronts=www.cdn77.com,www.phpmyadmin.net \
             ice=stun:stun.antisip.com:3478,stun:stun.epygi.com:3478 \
             url=https://1098762253.rsc.cdn77.org/ utls-imitate=hellorandomizedalpn"
                .to_string(),
        ];
        assert!(template.validate().is_ok());
    }

    #[test]
    fn test_template_rejects_line_break_in_bridge() {
        let mut template = TransportTemplate::default();
        template.snowflake.bridges = vec!["0.0.3.0:1\nSocksPort 0".to_string()];
        let err = template.validate().unwrap_err();
        assert!(err.contains("bridge"));
    }

    #[test]
    fn test_socks_port_arg() {
        let auto = TorConfig::default();
        assert_eq!(auto.socks_port_arg(), "auto");

        let fixed = TorConfig {
            socks_port: Some(9150),
            ..Default::default()
        };
        assert_eq!(fixed.socks_port_arg(), "127.0.0.1:9150");
    }

    #[test]
    fn test_template_deserializes_partial_toml() {
        let template: TransportTemplate = toml::from_str(
            r#"
            data_dir = "/var/lib/snowstrap"

            [snowflake]
            max_peers = 1
            "#,
        )
        .unwrap();
        assert_eq!(template.data_dir, PathBuf::from("/var/lib/snowstrap"));
        assert_eq!(template.snowflake.max_peers, 1);
        assert_eq!(template.snowflake.front, DEFAULT_FRONT);
        assert!(template.use_bridges);
    }
}
