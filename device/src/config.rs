//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `device.toml`.
//!     loads configuration from file or falls back to defaults, then lets
//!     command line flags override individual values.
//!
//! structure:
//!     - NodeSection: data directory and snapshot file name.
//!     - ListenerConfig: bind host/port, used for [external] and [internal].
//!     - BootstrapConfig: the index host seeded into external membership.
//!     - ExchangeConfig: background push loop.
//!     - SecurityConfig: key/cert/trust bundle file names, sender checks.
//!     - LoggingConfig: default log level.
//!
//! ==============================================================================

use crate::tls::TlsPaths;

use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub external: ListenerConfig,
    pub internal: ListenerConfig,
    pub bootstrap: BootstrapConfig,
    pub exchange: ExchangeConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct NodeSection {
    /// directory holding credentials and the snapshot
    pub dir: PathBuf,
    pub snapshot_file: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BootstrapConfig {
    pub index_host: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ExchangeConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    pub key_file: String,
    pub cert_file: String,
    pub ca_file: String,
    /// external records must carry the sender's own name
    pub verify_sender_name: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

const DEFAULT_HOST: &str = "rasp-019.scss.tcd.ie";

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            snapshot_file: "data.json".to_string(),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self { index_host: DEFAULT_HOST.to_string() }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self { enabled: true, interval_seconds: 30, timeout_seconds: 10 }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            key_file: "bundled.key".to_string(),
            cert_file: "bundled.crt".to_string(),
            ca_file: "ca.crt".to_string(),
            verify_sender_name: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl LoggingConfig {
    /// filter for the configured level, raised by `-v` / `-vv`
    ///
    /// a level that does not parse falls back to "info"; the parse error is
    /// handed back so it can be logged once the subscriber is up.
    pub fn env_filter(&self, verbosity: u8) -> (EnvFilter, Option<ParseError>) {
        let level = match verbosity {
            0 => self.level.as_str(),
            1 => "debug",
            _ => "trace",
        };
        match EnvFilter::try_new(level) {
            Ok(filter) => (filter, None),
            Err(e) => (EnvFilter::new("info"), Some(e)),
        }
    }
}

// [external] and [internal] share a type but not defaults, so a partially
// written section falls back field by field on the right side.
impl ListenerConfig {
    fn external_default() -> Self {
        Self { host: DEFAULT_HOST.to_string(), port: 33000 }
    }

    fn internal_default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 443 }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawListener {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    node: NodeSection,
    external: RawListener,
    internal: RawListener,
    bootstrap: BootstrapConfig,
    exchange: ExchangeConfig,
    security: SecurityConfig,
    logging: LoggingConfig,
}

fn merge_listener(raw: RawListener, fallback: ListenerConfig) -> ListenerConfig {
    ListenerConfig {
        host: raw.host.unwrap_or(fallback.host),
        port: raw.port.unwrap_or(fallback.port),
    }
}

/// defaults of the reference deployment
impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node: NodeSection::default(),
            external: ListenerConfig::external_default(),
            internal: ListenerConfig::internal_default(),
            bootstrap: BootstrapConfig::default(),
            exchange: ExchangeConfig::default(),
            security: SecurityConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Parse configuration from toml text
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let raw: RawConfig = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(Self {
            node: raw.node,
            external: merge_listener(raw.external, ListenerConfig::external_default()),
            internal: merge_listener(raw.internal, ListenerConfig::internal_default()),
            bootstrap: raw.bootstrap,
            exchange: raw.exchange,
            security: raw.security,
            logging: raw.logging,
        })
    }

    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        Self::from_toml(&content)
    }

    /// Load with default fallback
    ///
    /// an explicit path is tried first, then config/device.toml and
    /// ../config/device.toml.
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        let mut paths = Vec::new();
        if let Some(p) = explicit {
            paths.push(p.to_path_buf());
        }
        paths.push(PathBuf::from("config").join("device.toml"));
        paths.push(PathBuf::from("..").join("config").join("device.toml"));

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        tracing::info!(path = %path.display(), "config loaded");
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to load config");
                    }
                }
            } else if Some(path.as_path()) == explicit {
                tracing::warn!(path = %path.display(), "config file does not exist");
            }
        }

        tracing::warn!("no config file found, using defaults");
        Self::default()
    }

    /// apply command line overrides
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(dir) = &cli.dir {
            self.node.dir = dir.clone();
        }
        if let Some(host) = &cli.host {
            self.external.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.external.port = port;
        }
        if let Some(host) = &cli.subhost {
            self.internal.host = host.clone();
        }
        if let Some(port) = cli.subport {
            self.internal.port = port;
        }
        if let Some(index) = &cli.index {
            self.bootstrap.index_host = index.clone();
        }
    }

    /// this node's identity on the external overlay
    pub fn self_name(&self) -> &str {
        &self.external.host
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.node.dir.join(&self.node.snapshot_file)
    }

    pub fn tls_paths(&self) -> TlsPaths {
        TlsPaths::in_dir(
            &self.node.dir,
            &self.security.key_file,
            &self.security.cert_file,
            &self.security.ca_file,
        )
    }

    pub fn exchange_interval(&self) -> Duration {
        Duration::from_secs(self.exchange.interval_seconds.max(1))
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange.timeout_seconds.max(1))
    }

    /// Log configuration summary
    pub fn print_summary(&self) {
        tracing::info!(
            node = %self.self_name(),
            dir = %self.node.dir.display(),
            external = %format!("{}:{}", self.external.host, self.external.port),
            internal = %format!("{}:{}", self.internal.host, self.internal.port),
            index = %self.bootstrap.index_host,
            exchange = self.exchange.enabled,
            "device configuration"
        );
    }
}

/// command line flags; each one overrides the matching config value
#[derive(Parser, Debug, Default)]
#[command(name = "mesh-device", version, about = "Device node of the sensor mesh")]
pub struct Cli {
    /// directory to save data (and read credentials from)
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// external host name, also this device's identity
    #[arg(long)]
    pub host: Option<String>,

    /// external port
    #[arg(long)]
    pub port: Option<u16>,

    /// internal bind host for sensor peers
    #[arg(long)]
    pub subhost: Option<String>,

    /// internal port for sensor peers
    #[arg(long)]
    pub subport: Option<u16>,

    /// bootstrap index host
    #[arg(long)]
    pub index: Option<String>,

    /// path to device.toml
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let c = NodeConfig::default();
        assert_eq!(c.node.dir, PathBuf::from("."));
        assert_eq!(c.external, ListenerConfig { host: DEFAULT_HOST.into(), port: 33000 });
        assert_eq!(c.internal, ListenerConfig { host: "127.0.0.1".into(), port: 443 });
        assert_eq!(c.bootstrap.index_host, DEFAULT_HOST);
        assert_eq!(c.snapshot_path(), PathBuf::from("./data.json"));
        assert_eq!(c.tls_paths().ca, PathBuf::from("./ca.crt"));
    }

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(NodeConfig::from_toml("").unwrap(), NodeConfig::default());
    }

    #[test]
    fn partial_sections_keep_their_own_defaults() {
        let c = NodeConfig::from_toml(
            r#"
            [internal]
            port = 8443

            [external]
            host = "rasp-020.scss.tcd.ie"

            [exchange]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(c.internal, ListenerConfig { host: "127.0.0.1".into(), port: 8443 });
        assert_eq!(c.external, ListenerConfig { host: "rasp-020.scss.tcd.ie".into(), port: 33000 });
        assert!(!c.exchange.enabled);
        assert_eq!(c.exchange.interval_seconds, 30);
        assert_eq!(c.self_name(), "rasp-020.scss.tcd.ie");
    }

    #[test]
    fn log_level_is_used_and_raised_by_verbosity() {
        let logging = LoggingConfig { level: "warn".into() };

        let (filter, rejected) = logging.env_filter(0);
        assert!(rejected.is_none());
        assert_eq!(filter.to_string(), "warn");

        let (filter, _) = logging.env_filter(2);
        assert_eq!(filter.to_string(), "trace");
    }

    #[test]
    fn invalid_log_level_falls_back_to_info() {
        let logging = LoggingConfig { level: "mesh=verbose".into() };

        let (filter, rejected) = logging.env_filter(0);
        assert!(rejected.is_some());
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(NodeConfig::from_toml("[external\nport = ").is_err());
    }

    #[test]
    fn cli_overrides_file_values() {
        let mut c = NodeConfig::default();
        let cli = Cli::parse_from([
            "mesh-device",
            "--dir",
            "/var/lib/mesh",
            "--host",
            "rasp-021",
            "--subport",
            "9443",
            "--index",
            "index.local",
        ]);
        c.apply_cli(&cli);

        assert_eq!(c.node.dir, PathBuf::from("/var/lib/mesh"));
        assert_eq!(c.self_name(), "rasp-021");
        assert_eq!(c.external.port, 33000);
        assert_eq!(c.internal.port, 9443);
        assert_eq!(c.bootstrap.index_host, "index.local");
    }

    #[test]
    fn load_or_default_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.toml");
        std::fs::write(&path, "[bootstrap]\nindex_host = \"idx\"\n").unwrap();

        let c = NodeConfig::load_or_default(Some(&path));
        assert_eq!(c.bootstrap.index_host, "idx");
    }
}
