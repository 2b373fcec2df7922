//! Configuration types for dkim-sync.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::SyncError;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Key storage configuration.
    #[serde(default)]
    pub keys: KeysConfig,

    /// Domain source configuration.
    pub source: SourceConfig,

    /// Cloudflare API configuration.
    pub cloudflare: CloudflareConfig,

    /// Local signer configuration.
    #[serde(default)]
    pub signer: SignerConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Check the values that cannot be expressed through serde alone.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.keys.target_path.as_os_str().is_empty() {
            return Err(SyncError::Config("keys.target_path is empty".into()));
        }
        if self.cloudflare.api_token.trim().is_empty() {
            return Err(SyncError::Config("cloudflare.api_token is empty".into()));
        }
        if self.source.domains.is_empty() && self.source.domains_file.is_none() {
            return Err(SyncError::Config(
                "one of source.domains or source.domains_file is required".into(),
            ));
        }
        self.source.sync_interval()?;
        Ok(())
    }
}

/// Where keys, records and the OpenDKIM tables are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Base directory; each domain gets `<target_path>/<domain>/`.
    #[serde(default = "default_target_path")]
    pub target_path: PathBuf,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            target_path: default_target_path(),
        }
    }
}

/// Domain source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// How often the domain set is refreshed (e.g. "5m", "30s", "1h 30m").
    #[serde(default = "default_sync_interval")]
    pub sync_interval: String,

    /// Mail addresses or bare domains.
    #[serde(default)]
    pub domains: Vec<String>,

    /// File with one mail address or domain per line, re-read every tick.
    #[serde(default)]
    pub domains_file: Option<PathBuf>,
}

impl SourceConfig {
    /// Parse the configured sync interval.
    pub fn sync_interval(&self) -> Result<Duration, SyncError> {
        let interval = humantime::parse_duration(self.sync_interval.trim()).map_err(|source| {
            SyncError::Interval {
                value: self.sync_interval.clone(),
                source,
            }
        })?;
        if interval.is_zero() {
            return Err(SyncError::Config("source.sync_interval must be positive".into()));
        }
        Ok(interval)
    }
}

/// Cloudflare API configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct CloudflareConfig {
    /// API token with DNS edit permission on the managed zones.
    pub api_token: String,

    /// API base URL.
    #[serde(default = "default_cloudflare_base_url")]
    pub base_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for CloudflareConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareConfig")
            .field("api_token", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Local signer (OpenDKIM) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Send a reload signal after the tables are written.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Substring matched against running executable names.
    #[serde(default = "default_process_name")]
    pub process_name: String,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            process_name: default_process_name(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "dkim_sync=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_target_path() -> PathBuf {
    PathBuf::from("/etc/opendkim/keys")
}

fn default_sync_interval() -> String {
    "5m".to_string()
}

fn default_cloudflare_base_url() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_process_name() -> String {
    "opendkim".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
