//! Limiter configuration module
//!
//! Parses the limiter settings from YAML files.
//!
//! Uses serde_yaml for parsing; optional fields fall back to the defaults
//! below, and `validate` rejects values the limiter cannot run with.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Newest config layout this build understands.
pub const CURRENT_CONFIG_VERSION: u32 = 0;

/// Limiter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    // ============================================
    // Rate Limit
    // ============================================
    /// Sampling window, in seconds
    #[serde(default = "default_interval")]
    pub interval: f64,

    /// Packets per second a client may send, averaged over `interval`
    #[serde(default = "default_max_packet_rate")]
    pub max_packet_rate: f64,

    /// Buckets the window is split into (memory vs. resolution)
    #[serde(default = "default_bucket_count")]
    pub bucket_count: u32,

    /// Sent to the client when it is disconnected
    #[serde(default = "default_kick_message")]
    pub kick_message: String,

    // ============================================
    // Proxy
    // ============================================
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Game server that allowed packets are forwarded to
    #[serde(default = "default_upstream_addr")]
    pub upstream_addr: String,

    #[serde(default)]
    pub config_version: u32,
}

fn default_interval() -> f64 {
    7.0
}

fn default_max_packet_rate() -> f64 {
    500.0
}

fn default_bucket_count() -> u32 {
    150
}

fn default_kick_message() -> String {
    "Kicked for sending too many packets".to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:2010".to_string()
}

fn default_upstream_addr() -> String {
    "127.0.0.1:2001".to_string()
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            max_packet_rate: default_max_packet_rate(),
            bucket_count: default_bucket_count(),
            kick_message: default_kick_message(),
            listen_addr: default_listen_addr(),
            upstream_addr: default_upstream_addr(),
            config_version: CURRENT_CONFIG_VERSION,
        }
    }
}

impl LimiterConfig {
    /// Load configuration from a YAML file
    ///
    /// # Example
    /// ```no_run
    /// use packet_limiter::config::LimiterConfig;
    ///
    /// let config = LimiterConfig::from_file("conf/limiter.yaml")
    ///     .expect("Failed to load config");
    /// println!("Max rate: {}", config.max_packet_rate);
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: LimiterConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML in {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn from_str(contents: &str) -> Result<Self> {
        let config: LimiterConfig = serde_yaml::from_str(contents)
            .context("Failed to parse YAML")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.config_version <= CURRENT_CONFIG_VERSION,
            "Trying to load newer config version! This build is for {}, but the config says {}",
            CURRENT_CONFIG_VERSION,
            self.config_version
        );
        anyhow::ensure!(
            self.interval > 0.0 && self.interval.is_finite(),
            "interval must be positive, got {}",
            self.interval
        );
        anyhow::ensure!(
            self.max_packet_rate > 0.0,
            "max_packet_rate must be positive, got {}",
            self.max_packet_rate
        );
        anyhow::ensure!(self.bucket_count > 0, "bucket_count must be positive");
        anyhow::ensure!(!self.upstream_addr.is_empty(), "upstream_addr cannot be empty");

        Ok(())
    }

    /// Window length in the counter's unit (ms).
    pub fn interval_millis(&self) -> f64 {
        self.interval * 1000.0
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(&self)
            .context("Failed to serialize config to YAML")?;

        fs::write(path.as_ref(), yaml)
            .with_context(|| format!("Failed to write config to {}", path.as_ref().display()))?;

        Ok(())
    }
}
