//! Exporter configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub polling: PollSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address the metrics endpoint listens on
    #[serde(default = "ServerSettings::default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "ServerSettings::default_metrics_path")]
    pub metrics_path: String,
    #[serde(default = "ServerSettings::default_log_level")]
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            metrics_path: Self::default_metrics_path(),
            log_level: Self::default_log_level(),
        }
    }
}

impl ServerSettings {
    fn default_listen_addr() -> String {
        "0.0.0.0:9120".to_string()
    }

    fn default_metrics_path() -> String {
        "/metrics".to_string()
    }

    fn default_log_level() -> String {
        "info".to_string()
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address '{}'", self.listen_addr))
    }

    /// Replace the port of `listen_addr`, keeping its host
    pub fn set_port(&mut self, port: u16) -> Result<()> {
        let mut addr = self.socket_addr()?;
        addr.set_port(port);
        self.listen_addr = addr.to_string();
        Ok(())
    }
}

/// What to do when a stick fails its handshake or a read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Release only the failing stick and keep polling the others
    #[default]
    Retire,
    /// Stop the whole exporter
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSettings {
    /// Delay between polling rounds in milliseconds
    #[serde(default = "PollSettings::default_interval_ms")]
    pub interval_ms: u64,
    /// Raw-count offset applied to sticks without their own entry
    #[serde(default)]
    pub calibration_offset: i32,
    /// Per-stick raw-count offsets, by catalog index
    #[serde(default)]
    pub calibration_offsets: Vec<i32>,
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: Self::default_interval_ms(),
            calibration_offset: 0,
            calibration_offsets: Vec::new(),
            on_failure: FailurePolicy::default(),
        }
    }
}

impl PollSettings {
    fn default_interval_ms() -> u64 {
        1000
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Calibration offset for the stick at `index`
    pub fn offset_for(&self, index: usize) -> i32 {
        self.calibration_offsets
            .get(index)
            .copied()
            .unwrap_or(self.calibration_offset)
    }
}

impl ExporterConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/temper-exporter/exporter.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn parse(content: &str) -> Result<Self> {
        let config: ExporterConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("{:#}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("temper-exporter").join("exporter.toml")
        } else {
            PathBuf::from(".config/temper-exporter/exporter.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        self.server.socket_addr()?;

        let path = &self.server.metrics_path;
        if !path.starts_with('/') {
            return Err(anyhow!("Invalid metrics path '{}', must start with '/'", path));
        }
        if path == "/health" {
            return Err(anyhow!("Metrics path '/health' is reserved"));
        }

        if self.polling.interval_ms == 0 {
            return Err(anyhow!("Polling interval must be greater than 0"));
        }

        Ok(())
    }
}

/// Expand `~` in a user-supplied config path
pub fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).as_ref()),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExporterConfig::default();
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.server.metrics_path, "/metrics");
        assert_eq!(config.polling.interval(), Duration::from_secs(1));
        assert_eq!(config.polling.on_failure, FailurePolicy::Retire);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_offset_for() {
        let polling = PollSettings {
            calibration_offset: -3,
            calibration_offsets: vec![10, 20],
            ..PollSettings::default()
        };
        assert_eq!(polling.offset_for(0), 10);
        assert_eq!(polling.offset_for(1), 20);
        assert_eq!(polling.offset_for(2), -3);
    }

    #[test]
    fn test_set_port_keeps_host() {
        let mut server = ServerSettings {
            listen_addr: "127.0.0.1:9120".to_string(),
            ..ServerSettings::default()
        };
        server.set_port(8080).unwrap();
        assert_eq!(server.listen_addr, "127.0.0.1:8080");
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = ExporterConfig::default();
        config.server.log_level = "verbose".to_string();
        assert!(config.validate().is_err());

        config.server.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_metrics_path() {
        let mut config = ExporterConfig::default();
        config.server.metrics_path = "metrics".to_string();
        assert!(config.validate().is_err());

        config.server.metrics_path = "/health".to_string();
        assert!(config.validate().is_err());

        config.server.metrics_path = "/probe/temper".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_expand_path() {
        let absolute = expand_path(Path::new("/etc/temper-exporter/exporter.toml"));
        assert_eq!(absolute, PathBuf::from("/etc/temper-exporter/exporter.toml"));

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path(Path::new("~/exporter.toml")), home.join("exporter.toml"));
        }
    }
}
